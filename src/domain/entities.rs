//! Domain entities mirrored from persistent storage.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::record::{Entity, Record};

/// Score field name for [`Ticket::security_risk`].
pub const SECURITY_RISK_FIELD: &str = "security_risk";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    #[serde(flatten)]
    pub record: Record,
    pub name: String,
    pub email: String,
}

impl Account {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            record: Record::new(),
            name: name.into(),
            email: email.into(),
        }
    }
}

impl Entity for Account {
    fn record(&self) -> &Record {
        &self.record
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    #[serde(flatten)]
    pub record: Record,
    pub category: String,
}

impl Category {
    pub fn new(category: impl Into<String>) -> Self {
        Self {
            record: Record::new(),
            category: category.into(),
        }
    }
}

impl Entity for Category {
    fn record(&self) -> &Record {
        &self.record
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    #[serde(flatten)]
    pub record: Record,
    pub description: String,
    pub resolved: bool,
    pub security_risk: i64,
    pub account_uuid: Uuid,
    pub account_rand_id: String,
    #[serde(default)]
    pub category_uuid: Option<Uuid>,
    #[serde(default)]
    pub category_rand_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<Account>,
}

impl Ticket {
    pub fn new(description: impl Into<String>, reporter: &Account, security_risk: i64) -> Self {
        Self {
            record: Record::new(),
            description: description.into(),
            resolved: false,
            security_risk,
            account_uuid: reporter.record.uuid,
            account_rand_id: reporter.record.rand_id.clone(),
            category_uuid: None,
            category_rand_id: None,
            account: None,
        }
    }

    pub fn with_category(mut self, category: &Category) -> Self {
        self.category_uuid = Some(category.record.uuid);
        self.category_rand_id = Some(category.record.rand_id.clone());
        self
    }

    pub fn set_description(&mut self, description: impl Into<String>) {
        self.description = description.into();
        self.record.touch();
    }

    pub fn set_resolved(&mut self) {
        self.resolved = true;
        self.record.touch();
    }
}

impl Entity for Ticket {
    fn record(&self) -> &Record {
        &self.record
    }

    fn score_field(&self, field: &str) -> Option<f64> {
        match field {
            SECURITY_RISK_FIELD => Some(self.security_risk as f64),
            _ => None,
        }
    }
}
