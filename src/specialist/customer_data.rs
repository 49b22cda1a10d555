//! Customer-data specialist: record lookup and plan entitlement

use super::{params, Specialist, TaskOutput};
use crate::error::{Error, Result};
use crate::payload::{CustomerLookup, CustomerRecord, CustomerSearch};
use crate::protocol::{codes, Intent, LookupCustomerParams, SearchCustomersParams, TaskError, TaskRequest};
use crate::types::Role;
use async_trait::async_trait;

const DEMO_CUSTOMERS: &str = include_str!("../../demo_data/customers.yaml");

/// In-memory customer table
#[derive(Debug, Clone, Default)]
pub struct CustomerDirectory {
    customers: Vec<CustomerRecord>,
}

impl CustomerDirectory {
    /// Create a directory over the given records
    pub fn new(customers: Vec<CustomerRecord>) -> Self {
        Self { customers }
    }

    /// Load records from a YAML list
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let customers = serde_yaml::from_str(yaml).map_err(|e| {
            Error::specialist(
                Role::CustomerData.as_str(),
                format!("Failed to parse customer data: {}", e),
            )
        })?;
        Ok(Self::new(customers))
    }

    /// The bundled demo customers
    pub fn demo() -> Result<Self> {
        Self::from_yaml(DEMO_CUSTOMERS)
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.customers.len()
    }

    /// Whether the directory is empty
    pub fn is_empty(&self) -> bool {
        self.customers.is_empty()
    }

    /// Case-insensitive exact email match
    pub fn lookup(&self, email: &str) -> Option<&CustomerRecord> {
        let email = email.trim();
        self.customers
            .iter()
            .find(|customer| customer.email.eq_ignore_ascii_case(email))
    }

    /// Case-insensitive substring match on one field. `None` when the field
    /// is not searchable.
    pub fn search(&self, field: &str, value: &str, limit: usize) -> Option<Vec<CustomerRecord>> {
        if !CustomerRecord::FIELDS.contains(&field) {
            return None;
        }
        let needle = value.trim().to_lowercase();
        Some(
            self.customers
                .iter()
                .filter(|customer| {
                    customer
                        .field(field)
                        .is_some_and(|v| v.to_lowercase().contains(&needle))
                })
                .take(limit)
                .cloned()
                .collect(),
        )
    }
}

/// Serves `lookup_customer` and `search_customers`
pub struct CustomerDataSpecialist {
    directory: CustomerDirectory,
}

impl CustomerDataSpecialist {
    /// Create the specialist over a directory
    pub fn new(directory: CustomerDirectory) -> Self {
        Self { directory }
    }

    fn lookup(&self, params: LookupCustomerParams) -> TaskOutput {
        if !params.email.contains('@') {
            return Err(TaskError::new(
                codes::INVALID_PARAMS,
                format!("not an email address: {:?}", params.email),
            ));
        }

        let customer = self.directory.lookup(&params.email).ok_or_else(|| {
            TaskError::new(
                codes::CUSTOMER_NOT_FOUND,
                format!("No customer found with email: {}", params.email),
            )
        })?;

        let entitled = params
            .capability
            .as_deref()
            .map(|capability| customer.has_feature(capability));
        let lookup = CustomerLookup {
            found: true,
            customer: customer.clone(),
            capability: params.capability,
            entitled,
        };
        serde_json::to_value(lookup).map_err(|e| TaskError::new(codes::EXECUTION_FAILED, e.to_string()))
    }

    fn search(&self, params: SearchCustomersParams) -> TaskOutput {
        let matches = self
            .directory
            .search(&params.field, &params.value, params.limit)
            .ok_or_else(|| {
                TaskError::new(
                    codes::INVALID_PARAMS,
                    format!("unknown customer field: {}", params.field),
                )
            })?;
        let search = CustomerSearch {
            count: matches.len(),
            matches,
        };
        serde_json::to_value(search).map_err(|e| TaskError::new(codes::EXECUTION_FAILED, e.to_string()))
    }
}

#[async_trait]
impl Specialist for CustomerDataSpecialist {
    fn role(&self) -> Role {
        Role::CustomerData
    }

    async fn execute(&self, intent: Intent, request: &TaskRequest) -> TaskOutput {
        match intent {
            Intent::LookupCustomer => self.lookup(params(request)?),
            Intent::SearchCustomers => self.search(params(request)?),
            other => Err(TaskError::new(
                codes::UNSUPPORTED_INTENT,
                format!("customer data does not support {}", other),
            )),
        }
    }
}
