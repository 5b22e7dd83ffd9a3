//! Turns a policy and a starting identity into the ordered approver list
//! that becomes an approval chain.

use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::approvals::policy::{PolicyRegistry, ResolverStrategy, WalkPolicy};
use crate::directory::fixtures::SAMPLE_ORG_CHART;
use crate::directory::{Department, Located, OrgChart, OrgDirectory, ReportsTo, Seat};
use crate::domain::person::{EmailKey, Person};
use crate::domain::subject::PolicyKey;
use crate::errors::WorkflowError;

/// Where resolution starts. Walk policies take a person, invoice routing a
/// department (plus optional service category), onboarding a supplier type.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StartingIdentity {
    Person { name: String, department: Option<String> },
    Department { department: String, category: Option<String> },
    SupplierType { supplier_type: String },
}

impl StartingIdentity {
    pub fn person(name: impl Into<String>) -> Self {
        Self::Person { name: name.into(), department: None }
    }

    pub fn person_in(name: impl Into<String>, department: impl Into<String>) -> Self {
        Self::Person { name: name.into(), department: Some(department.into()) }
    }

    pub fn department(department: impl Into<String>, category: Option<String>) -> Self {
        Self::Department { department: department.into(), category }
    }

    pub fn supplier_type(supplier_type: impl Into<String>) -> Self {
        Self::SupplierType { supplier_type: supplier_type.into() }
    }
}

impl fmt::Display for StartingIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Person { name, department: Some(department) } => {
                write!(f, "person `{name}` ({department})")
            }
            Self::Person { name, department: None } => write!(f, "person `{name}`"),
            Self::Department { department, category: Some(category) } => {
                write!(f, "department `{department}` / `{category}`")
            }
            Self::Department { department, category: None } => {
                write!(f, "department `{department}`")
            }
            Self::SupplierType { supplier_type } => write!(f, "supplier type `{supplier_type}`"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedApprover {
    pub level: u32,
    pub person: Person,
}

/// Why a supervisor walk stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum WalkEnd {
    ReachedTop,
    DeadEnd,
}

#[derive(Clone)]
pub struct ChainResolver {
    directory: Arc<dyn OrgDirectory>,
    policies: Arc<PolicyRegistry>,
}

impl fmt::Debug for ChainResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainResolver")
            .field("departments", &self.directory.list_departments())
            .field("policies", &self.policies)
            .finish()
    }
}

impl ChainResolver {
    pub fn new(directory: Arc<dyn OrgDirectory>, policies: Arc<PolicyRegistry>) -> Self {
        Self { directory, policies }
    }

    /// Builds the chart and the policy tables from one TOML document.
    pub fn from_toml_str(raw: &str) -> Result<Self, WorkflowError> {
        let chart = OrgChart::from_toml_str(raw)
            .map_err(|error| WorkflowError::Configuration(error.to_string()))?;
        let policies = PolicyRegistry::from_toml_str(raw)
            .map_err(|error| WorkflowError::Configuration(error.to_string()))?;
        Ok(Self::new(Arc::new(chart), Arc::new(policies)))
    }

    pub fn load(path: &Path) -> Result<Self, WorkflowError> {
        let raw = std::fs::read_to_string(path).map_err(|error| {
            WorkflowError::Configuration(format!(
                "could not read org chart `{}`: {error}",
                path.display()
            ))
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn sample() -> Result<Self, WorkflowError> {
        Self::from_toml_str(SAMPLE_ORG_CHART)
    }

    pub fn directory(&self) -> &dyn OrgDirectory {
        self.directory.as_ref()
    }

    pub fn policies(&self) -> &PolicyRegistry {
        &self.policies
    }

    pub fn resolve(
        &self,
        policy_key: PolicyKey,
        identity: &StartingIdentity,
    ) -> Result<Vec<ResolvedApprover>, WorkflowError> {
        let people = match (self.policies.strategy(policy_key), identity) {
            (ResolverStrategy::SupervisorWalk(walk), StartingIdentity::Person { name, department }) => {
                self.supervisor_chain(policy_key, walk, name, department.as_deref())
            }
            (ResolverStrategy::InvoiceTable, StartingIdentity::Department { department, category }) => {
                self.invoice_chain(department, category.as_deref())?
            }
            (ResolverStrategy::OnboardingTable, StartingIdentity::SupplierType { supplier_type }) => {
                self.onboarding_chain(supplier_type)?
            }
            (_, identity) => {
                return Err(WorkflowError::Configuration(format!(
                    "policy `{}` cannot start from {identity}",
                    policy_key.as_str()
                )));
            }
        };

        let people = dedupe_by_email(people);
        if people.is_empty() {
            return Err(WorkflowError::Configuration(format!(
                "policy `{}` resolved no approvers for {identity}",
                policy_key.as_str()
            )));
        }

        Ok(people
            .into_iter()
            .zip(1_u32..)
            .map(|(person, level)| ResolvedApprover { level, person })
            .collect())
    }

    fn supervisor_chain(
        &self,
        policy_key: PolicyKey,
        walk: WalkPolicy,
        name: &str,
        department: Option<&str>,
    ) -> Vec<Person> {
        let fixed = self.policies.fixed_roles();

        let located = self.directory.locate(name).filter(|located| {
            department
                .map_or(true, |wanted| located.department.name.eq_ignore_ascii_case(wanted.trim()))
        });
        let mut chain = match located {
            Some(start) => self.walk_from(start),
            None => {
                let department_record = department.and_then(|wanted| self.directory.department(wanted));
                warn!(
                    event_name = "approvals.resolver.person_not_found",
                    policy_key = policy_key.as_str(),
                    starting_person = name,
                    department = department.unwrap_or(""),
                    department_known = department_record.is_some(),
                    "starting person not found in org directory; using default chain"
                );
                department_record.map(|record| vec![record.head.clone()]).unwrap_or_default()
            }
        };

        if walk.append_finance {
            chain.push(fixed.finance.clone());
        }
        let top_role = fixed.top_executive.role.trim();
        if walk.append_top_executive && !chain.iter().any(|person| person.role.trim() == top_role) {
            chain.push(fixed.top_executive.clone());
        }
        chain
    }

    /// Follows `reports_to` edges inside the starting department. The
    /// starting person is never part of the result.
    fn walk_from(&self, start: Located<'_>) -> Vec<Person> {
        let department = start.department;
        let mut visited: HashSet<SeatKey<'_>> = HashSet::from([SeatKey::of(start.seat)]);
        let mut chain = Vec::new();
        let mut current = start;

        let end = loop {
            let next = match current.reports_to() {
                ReportsTo::Top => {
                    chain.push(self.policies.fixed_roles().top_executive.clone());
                    break WalkEnd::ReachedTop;
                }
                ReportsTo::DepartmentHead => Located { department, seat: Seat::Head },
                ReportsTo::Position(reference) => match department.find_position(reference) {
                    Some(position) => Located { department, seat: Seat::Position(position) },
                    None => break WalkEnd::DeadEnd,
                },
            };
            if !visited.insert(SeatKey::of(next.seat)) {
                break WalkEnd::DeadEnd;
            }
            chain.push(next.person().clone());
            current = next;
        };

        if end == WalkEnd::DeadEnd {
            append_head_once(&mut chain, department, start);
        }
        chain
    }

    fn invoice_chain(
        &self,
        department: &str,
        category: Option<&str>,
    ) -> Result<Vec<Person>, WorkflowError> {
        let route = self.policies.invoice_route(department, category).ok_or_else(|| {
            WorkflowError::Configuration(format!(
                "no supplier-invoice route for department `{department}` and no `*` route"
            ))
        })?;

        Ok(vec![
            route.department_head.clone(),
            route.head_of_business.clone(),
            self.policies.fixed_roles().finance.clone(),
        ])
    }

    fn onboarding_chain(&self, supplier_type: &str) -> Result<Vec<Person>, WorkflowError> {
        let route = self.policies.onboarding_route(supplier_type).ok_or_else(|| {
            WorkflowError::Configuration(format!(
                "no supplier-onboarding route for `{supplier_type}` and no `*` route"
            ))
        })?;

        let finance = &self.policies.fixed_roles().finance;
        let mut chain = route.approvers.clone();
        if !chain.last().is_some_and(|last| last.same_identity(finance)) {
            chain.push(finance.clone());
        }
        Ok(chain)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum SeatKey<'a> {
    Head,
    Position(&'a str),
}

impl<'a> SeatKey<'a> {
    fn of(seat: Seat<'a>) -> Self {
        match seat {
            Seat::Head => Self::Head,
            Seat::Position(position) => Self::Position(position.title.as_str()),
        }
    }
}

fn append_head_once(chain: &mut Vec<Person>, department: &Department, start: Located<'_>) {
    let head = &department.head;
    let is_start = matches!(start.seat, Seat::Head);
    if !is_start && !chain.iter().any(|person| person.same_identity(head)) {
        chain.push(head.clone());
    }
}

/// Keeps the lowest level at which each email appears.
fn dedupe_by_email(people: Vec<Person>) -> Vec<Person> {
    let mut seen: HashSet<EmailKey> = HashSet::new();
    people.into_iter().filter(|person| seen.insert(person.email_key())).collect()
}
