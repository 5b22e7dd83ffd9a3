use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::person::Person;
use crate::domain::subject::PolicyKey;

/// Roles injected into chains regardless of the walk.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixedRoles {
    pub finance: Person,
    pub top_executive: Person,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalkPolicy {
    #[serde(default = "enabled")]
    pub append_finance: bool,
    #[serde(default = "enabled")]
    pub append_top_executive: bool,
}

impl Default for WalkPolicy {
    fn default() -> Self {
        Self { append_finance: true, append_top_executive: true }
    }
}

fn enabled() -> bool {
    true
}

/// Supplier-invoice route: department head, then head of business, then
/// the fixed finance role.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceRoute {
    pub department: String,
    #[serde(default)]
    pub category: Option<String>,
    pub department_head: Person,
    pub head_of_business: Person,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnboardingRoute {
    pub supplier_type: String,
    pub approvers: Vec<Person>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResolverStrategy {
    SupervisorWalk(WalkPolicy),
    InvoiceTable,
    OnboardingTable,
}

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("could not read policy file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse policy file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("policy file must define [fixed_roles.finance] and [fixed_roles.top_executive]")]
    MissingFixedRoles,
    #[error("invoice route for `{department}` is invalid: {reason}")]
    InvalidInvoiceRoute { department: String, reason: String },
    #[error("onboarding route for supplier type `{0}` has no approvers")]
    EmptyOnboardingRoute(String),
    #[error("onboarding route for supplier type `{supplier_type}` is invalid: {reason}")]
    InvalidOnboardingRoute { supplier_type: String, reason: String },
}

pub const WILDCARD: &str = "*";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PolicyRegistry {
    fixed_roles: FixedRoles,
    cash_request: WalkPolicy,
    user_hierarchy: WalkPolicy,
    invoice_routes: Vec<InvoiceRoute>,
    onboarding_routes: Vec<OnboardingRoute>,
}

impl PolicyRegistry {
    pub fn new(fixed_roles: FixedRoles) -> Self {
        Self {
            fixed_roles,
            cash_request: WalkPolicy::default(),
            user_hierarchy: WalkPolicy::default(),
            invoice_routes: Vec::new(),
            onboarding_routes: Vec::new(),
        }
    }

    pub fn with_walk_policy(mut self, policy_key: PolicyKey, policy: WalkPolicy) -> Self {
        match policy_key {
            PolicyKey::CashRequest => self.cash_request = policy,
            PolicyKey::UserHierarchy => self.user_hierarchy = policy,
            PolicyKey::SupplierInvoice | PolicyKey::SupplierOnboarding => {}
        }
        self
    }

    pub fn with_invoice_route(mut self, route: InvoiceRoute) -> Result<Self, PolicyError> {
        self.validate_invoice_route(&route)?;
        self.invoice_routes.push(route);
        Ok(self)
    }

    pub fn with_onboarding_route(mut self, route: OnboardingRoute) -> Result<Self, PolicyError> {
        if route.approvers.is_empty() {
            return Err(PolicyError::EmptyOnboardingRoute(route.supplier_type));
        }
        let finance = &self.fixed_roles.finance;
        let last = route.approvers.len() - 1;
        if route.approvers[..last].iter().any(|approver| approver.same_identity(finance)) {
            return Err(PolicyError::InvalidOnboardingRoute {
                supplier_type: route.supplier_type,
                reason: "finance must only appear as the final level".to_string(),
            });
        }
        self.onboarding_routes.push(route);
        Ok(self)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, PolicyError> {
        let document: PolicyDocument = toml::from_str(raw)?;
        let fixed_roles = document.fixed_roles.ok_or(PolicyError::MissingFixedRoles)?;

        let mut registry = Self::new(fixed_roles)
            .with_walk_policy(PolicyKey::CashRequest, document.walk.cash_request.unwrap_or_default())
            .with_walk_policy(
                PolicyKey::UserHierarchy,
                document.walk.user_hierarchy.unwrap_or_default(),
            );
        for route in document.invoice_routes {
            registry = registry.with_invoice_route(route)?;
        }
        for route in document.onboarding_routes {
            registry = registry.with_onboarding_route(route)?;
        }
        Ok(registry)
    }

    pub fn load(path: &Path) -> Result<Self, PolicyError> {
        let raw = fs::read_to_string(path)
            .map_err(|source| PolicyError::ReadFile { path: path.to_path_buf(), source })?;
        Self::from_toml_str(&raw)
    }

    pub fn fixed_roles(&self) -> &FixedRoles {
        &self.fixed_roles
    }

    pub fn strategy(&self, policy_key: PolicyKey) -> ResolverStrategy {
        match policy_key {
            PolicyKey::CashRequest => ResolverStrategy::SupervisorWalk(self.cash_request),
            PolicyKey::UserHierarchy => ResolverStrategy::SupervisorWalk(self.user_hierarchy),
            PolicyKey::SupplierInvoice => ResolverStrategy::InvoiceTable,
            PolicyKey::SupplierOnboarding => ResolverStrategy::OnboardingTable,
        }
    }

    /// Most specific route wins: department + category, department with no
    /// category, then the wildcard department.
    pub fn invoice_route(&self, department: &str, category: Option<&str>) -> Option<&InvoiceRoute> {
        let department = normalize_key(department);
        let category = category.map(normalize_key);

        category
            .as_deref()
            .and_then(|category| {
                self.routes_for(&department).find(|route| {
                    route.category.as_deref().map(normalize_key).as_deref() == Some(category)
                })
            })
            .or_else(|| self.routes_for(&department).find(|route| route.category.is_none()))
            .or_else(|| self.routes_for(WILDCARD).find(|route| route.category.is_none()))
    }

    fn routes_for<'a, 'b>(
        &'a self,
        department: &'b str,
    ) -> impl Iterator<Item = &'a InvoiceRoute> + 'b
    where
        'a: 'b,
    {
        self.invoice_routes
            .iter()
            .filter(move |route| normalize_key(&route.department) == department)
    }

    pub fn onboarding_route(&self, supplier_type: &str) -> Option<&OnboardingRoute> {
        let supplier_type = normalize_key(supplier_type);
        self.onboarding_routes
            .iter()
            .find(|route| normalize_key(&route.supplier_type) == supplier_type)
            .or_else(|| self.onboarding_routes.iter().find(|route| route.supplier_type == WILDCARD))
    }

    pub fn invoice_routes(&self) -> &[InvoiceRoute] {
        &self.invoice_routes
    }

    pub fn onboarding_routes(&self) -> &[OnboardingRoute] {
        &self.onboarding_routes
    }

    fn validate_invoice_route(&self, route: &InvoiceRoute) -> Result<(), PolicyError> {
        let invalid = |reason: &str| PolicyError::InvalidInvoiceRoute {
            department: route.department.clone(),
            reason: reason.to_string(),
        };

        if route.department.trim().is_empty() {
            return Err(invalid("department is empty"));
        }
        if route.department_head.same_identity(&route.head_of_business) {
            return Err(invalid("department head and head of business are the same person"));
        }
        let finance = &self.fixed_roles.finance;
        if route.department_head.same_identity(finance)
            || route.head_of_business.same_identity(finance)
        {
            return Err(invalid("finance must only appear as the final level"));
        }
        Ok(())
    }
}

pub(crate) fn normalize_key(raw: &str) -> String {
    raw.trim().to_ascii_lowercase()
}

#[derive(Debug, Deserialize)]
struct PolicyDocument {
    fixed_roles: Option<FixedRoles>,
    #[serde(default)]
    walk: WalkDocument,
    #[serde(default)]
    invoice_routes: Vec<InvoiceRoute>,
    #[serde(default)]
    onboarding_routes: Vec<OnboardingRoute>,
}

#[derive(Debug, Default, Deserialize)]
struct WalkDocument {
    cash_request: Option<WalkPolicy>,
    user_hierarchy: Option<WalkPolicy>,
}

#[cfg(test)]
mod tests {
    use super::{
        FixedRoles, InvoiceRoute, OnboardingRoute, PolicyError, PolicyRegistry, ResolverStrategy,
        WalkPolicy,
    };
    use crate::directory::fixtures::SAMPLE_ORG_CHART;
    use crate::domain::person::Person;
    use crate::domain::subject::PolicyKey;

    fn fixed_roles() -> FixedRoles {
        FixedRoles {
            finance: Person::new("Fay", "fay@example.com", "Finance Manager", "Finance"),
            top_executive: Person::new("Olu", "olu@example.com", "Managing Director", "Executive"),
        }
    }

    fn route(department: &str, category: Option<&str>, head_email: &str) -> InvoiceRoute {
        InvoiceRoute {
            department: department.to_string(),
            category: category.map(str::to_string),
            department_head: Person::new("Head", head_email, "Head", department),
            head_of_business: Person::new("Vic", "vic@example.com", "Head of Business", "Business"),
        }
    }

    #[test]
    fn invoice_lookup_prefers_category_then_department_then_wildcard() {
        let registry = PolicyRegistry::new(fixed_roles())
            .with_invoice_route(route("Technical", None, "tech@example.com"))
            .and_then(|registry| {
                registry.with_invoice_route(route("Technical", Some("Diesel"), "ops@example.com"))
            })
            .and_then(|registry| registry.with_invoice_route(route("*", None, "any@example.com")))
            .expect("valid routes");

        let pick = |department: &str, category: Option<&str>| {
            registry
                .invoice_route(department, category)
                .map(|route| route.department_head.email.clone())
        };

        assert_eq!(pick("technical", Some("diesel")), Some("ops@example.com".to_string()));
        assert_eq!(pick("Technical", Some("spares")), Some("tech@example.com".to_string()));
        assert_eq!(pick("Technical", None), Some("tech@example.com".to_string()));
        assert_eq!(pick("HR", None), Some("any@example.com".to_string()));
    }

    #[test]
    fn invoice_route_must_name_three_distinct_people() {
        let mut bad = route("Technical", None, "vic@example.com");
        bad.department_head.email = "VIC@example.com".to_string();
        let error = PolicyRegistry::new(fixed_roles()).with_invoice_route(bad).expect_err("dup");
        assert!(matches!(error, PolicyError::InvalidInvoiceRoute { .. }));

        let finance_head = route("Finance", None, "fay@example.com");
        let error =
            PolicyRegistry::new(fixed_roles()).with_invoice_route(finance_head).expect_err("finance");
        assert!(matches!(error, PolicyError::InvalidInvoiceRoute { .. }));
    }

    #[test]
    fn onboarding_lookup_falls_back_to_wildcard() {
        let registry = PolicyRegistry::new(fixed_roles())
            .with_onboarding_route(OnboardingRoute {
                supplier_type: "*".to_string(),
                approvers: vec![fixed_roles().top_executive],
            })
            .expect("wildcard route");

        let route = registry.onboarding_route("catering").expect("wildcard applies");
        assert_eq!(route.supplier_type, "*");

        let error = PolicyRegistry::new(fixed_roles())
            .with_onboarding_route(OnboardingRoute {
                supplier_type: "fuel".to_string(),
                approvers: Vec::new(),
            })
            .expect_err("empty route");
        assert!(matches!(error, PolicyError::EmptyOnboardingRoute(ref kind) if kind == "fuel"));
    }

    #[test]
    fn onboarding_route_keeps_finance_last() {
        let vendor = Person::new("Bob", "bob@example.com", "Procurement Lead", "Operations");

        let error = PolicyRegistry::new(fixed_roles())
            .with_onboarding_route(OnboardingRoute {
                supplier_type: "fuel".to_string(),
                approvers: vec![fixed_roles().finance, vendor.clone()],
            })
            .expect_err("finance before another approver");
        assert!(
            matches!(error, PolicyError::InvalidOnboardingRoute { ref supplier_type, .. } if supplier_type == "fuel")
        );

        let registry = PolicyRegistry::new(fixed_roles())
            .with_onboarding_route(OnboardingRoute {
                supplier_type: "fuel".to_string(),
                approvers: vec![vendor, fixed_roles().finance],
            })
            .expect("finance as final level");
        assert_eq!(registry.onboarding_routes().len(), 1);
    }

    #[test]
    fn strategies_follow_policy_key() {
        let registry = PolicyRegistry::new(fixed_roles()).with_walk_policy(
            PolicyKey::UserHierarchy,
            WalkPolicy { append_finance: false, append_top_executive: true },
        );

        assert_eq!(
            registry.strategy(PolicyKey::CashRequest),
            ResolverStrategy::SupervisorWalk(WalkPolicy::default())
        );
        assert_eq!(
            registry.strategy(PolicyKey::UserHierarchy),
            ResolverStrategy::SupervisorWalk(WalkPolicy {
                append_finance: false,
                append_top_executive: true
            })
        );
        assert_eq!(registry.strategy(PolicyKey::SupplierInvoice), ResolverStrategy::InvoiceTable);
        assert_eq!(
            registry.strategy(PolicyKey::SupplierOnboarding),
            ResolverStrategy::OnboardingTable
        );
    }

    #[test]
    fn sample_file_parses_into_registry() {
        let registry = PolicyRegistry::from_toml_str(SAMPLE_ORG_CHART).expect("sample policies");

        assert_eq!(registry.fixed_roles().finance.name, "Grace Mensah");
        assert_eq!(registry.fixed_roles().top_executive.role, "Managing Director");
        assert_eq!(registry.invoice_routes().len(), 4);
        assert_eq!(registry.onboarding_routes().len(), 3);
    }

    #[test]
    fn missing_fixed_roles_is_reported() {
        let error = PolicyRegistry::from_toml_str("[[invoice_routes]]\ndepartment = \"HR\"\n")
            .expect_err("incomplete file");
        assert!(matches!(error, PolicyError::Parse(_) | PolicyError::MissingFixedRoles));

        let error = PolicyRegistry::from_toml_str("").expect_err("empty file");
        assert!(matches!(error, PolicyError::MissingFixedRoles));
    }
}
