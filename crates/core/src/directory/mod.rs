//! Immutable org chart used to resolve approvers.
//!
//! The chart is loaded once (from TOML or the bundled fixture) and handed to
//! the resolver as an `Arc<dyn OrgDirectory>`, so tests can swap in their
//! own graphs.

pub mod fixtures;

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::person::{EmailKey, Person};

/// Typed supervisor reference on a position.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportsTo {
    /// Another position in the same department, by title or occupant name.
    Position(String),
    DepartmentHead,
    Top,
}

impl ReportsTo {
    /// Converts a free-form supervisor string from older records.
    ///
    /// Precedence: a position in `department` whose title or occupant name
    /// matches, then any value containing `Head` (case-sensitive) as the
    /// department head, then the top role. Anything else is kept as a
    /// dangling position reference and ends the walk.
    pub fn from_legacy(raw: &str, department: &Department, top_role: &str) -> Self {
        let raw = raw.trim();
        if department.find_position(raw).is_some() {
            return Self::Position(raw.to_string());
        }
        if raw.contains("Head") {
            return Self::DepartmentHead;
        }
        if raw == top_role.trim() {
            return Self::Top;
        }
        Self::Position(raw.to_string())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub title: String,
    pub occupant: Person,
    pub reports_to: ReportsTo,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Department {
    pub name: String,
    pub head: Person,
    pub head_reports_to: ReportsTo,
    pub positions: Vec<Position>,
}

impl Department {
    /// Title match wins over occupant-name match.
    pub fn find_position(&self, reference: &str) -> Option<&Position> {
        let reference = reference.trim();
        self.positions
            .iter()
            .find(|position| position.title == reference)
            .or_else(|| self.positions.iter().find(|position| position.occupant.name == reference))
    }
}

/// Where a person sits in the chart.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Seat<'a> {
    Head,
    Position(&'a Position),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Located<'a> {
    pub department: &'a Department,
    pub seat: Seat<'a>,
}

impl<'a> Located<'a> {
    pub fn person(&self) -> &'a Person {
        match self.seat {
            Seat::Head => &self.department.head,
            Seat::Position(position) => &position.occupant,
        }
    }

    pub fn reports_to(&self) -> &'a ReportsTo {
        match self.seat {
            Seat::Head => &self.department.head_reports_to,
            Seat::Position(position) => &position.reports_to,
        }
    }
}

pub trait OrgDirectory: Send + Sync {
    fn department(&self, name: &str) -> Option<&Department>;

    fn list_departments(&self) -> Vec<String>;

    /// Exact display-name or case-insensitive email lookup: every department
    /// head first, then every position occupant.
    fn locate(&self, name: &str) -> Option<Located<'_>> {
        let name = name.trim();
        let is_match = |person: &Person| person.name == name || person.has_email(name);
        let departments: Vec<&Department> = self
            .list_departments()
            .iter()
            .filter_map(|department| self.department(department))
            .collect();

        departments
            .iter()
            .copied()
            .find(|department| is_match(&department.head))
            .map(|department| Located { department, seat: Seat::Head })
            .or_else(|| {
                departments.iter().copied().find_map(|department| {
                    department
                        .positions
                        .iter()
                        .find(|position| is_match(&position.occupant))
                        .map(|position| Located { department, seat: Seat::Position(position) })
                })
            })
    }
}

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("could not read org chart `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse org chart: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("department `{0}` is defined more than once")]
    DuplicateDepartment(String),
    #[error("`{name}` in department `{department}` has no email")]
    MissingEmail { department: String, name: String },
    #[error("email `{email}` is used by both `{first}` and `{second}`")]
    ConflictingIdentity { email: String, first: String, second: String },
}

#[derive(Clone, Debug, Default)]
pub struct OrgChart {
    departments: Vec<Department>,
    index: HashMap<String, usize>,
}

impl OrgChart {
    pub fn new(departments: Vec<Department>) -> Result<Self, DirectoryError> {
        let mut index = HashMap::new();
        let mut identities: BTreeMap<EmailKey, String> = BTreeMap::new();

        for (position, department) in departments.iter().enumerate() {
            if index.insert(department_key(&department.name), position).is_some() {
                return Err(DirectoryError::DuplicateDepartment(department.name.clone()));
            }

            let people = std::iter::once(&department.head)
                .chain(department.positions.iter().map(|position| &position.occupant));
            for person in people {
                if person.email.trim().is_empty() {
                    return Err(DirectoryError::MissingEmail {
                        department: department.name.clone(),
                        name: person.name.clone(),
                    });
                }
                match identities.get(&person.email_key()) {
                    Some(first) if *first != person.name => {
                        return Err(DirectoryError::ConflictingIdentity {
                            email: person.email.clone(),
                            first: first.clone(),
                            second: person.name.clone(),
                        });
                    }
                    Some(_) => {}
                    None => {
                        identities.insert(person.email_key(), person.name.clone());
                    }
                }
            }
        }

        Ok(Self { departments, index })
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, DirectoryError> {
        let document: ChartDocument = toml::from_str(raw)?;
        let top_role = document
            .fixed_roles
            .and_then(|roles| roles.top_executive)
            .map(|person| person.role)
            .unwrap_or_default();

        let departments = document
            .departments
            .into_iter()
            .map(|department| department.into_department(&top_role))
            .collect();
        Self::new(departments)
    }

    pub fn load(path: &Path) -> Result<Self, DirectoryError> {
        let raw = fs::read_to_string(path)
            .map_err(|source| DirectoryError::ReadFile { path: path.to_path_buf(), source })?;
        Self::from_toml_str(&raw)
    }

    pub fn departments(&self) -> &[Department] {
        &self.departments
    }

    pub fn people_count(&self) -> usize {
        self.departments.iter().map(|department| 1 + department.positions.len()).sum()
    }
}

impl OrgDirectory for OrgChart {
    fn department(&self, name: &str) -> Option<&Department> {
        self.index.get(&department_key(name)).and_then(|position| self.departments.get(*position))
    }

    fn list_departments(&self) -> Vec<String> {
        self.departments.iter().map(|department| department.name.clone()).collect()
    }
}

fn department_key(name: &str) -> String {
    name.trim().to_ascii_lowercase()
}

#[derive(Debug, Deserialize)]
struct ChartDocument {
    #[serde(default)]
    departments: Vec<DepartmentDocument>,
    fixed_roles: Option<TopRoleDocument>,
}

#[derive(Debug, Deserialize)]
struct TopRoleDocument {
    top_executive: Option<Person>,
}

#[derive(Debug, Deserialize)]
struct DepartmentDocument {
    name: String,
    head: Person,
    head_reports_to: Option<ReportsToDocument>,
    #[serde(default)]
    positions: Vec<PositionDocument>,
}

#[derive(Debug, Deserialize)]
struct PositionDocument {
    title: String,
    occupant: Person,
    reports_to: ReportsToDocument,
}

/// Accepts the typed form or a legacy free-form string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ReportsToDocument {
    Typed(ReportsTo),
    Legacy(String),
}

impl DepartmentDocument {
    fn into_department(self, top_role: &str) -> Department {
        let DepartmentDocument { name, head, head_reports_to, positions } = self;
        let name = name.trim().to_string();

        let (positions, references): (Vec<Position>, Vec<ReportsToDocument>) = positions
            .into_iter()
            .map(|position| {
                (
                    Position {
                        title: position.title.trim().to_string(),
                        occupant: position.occupant.in_department(&name),
                        reports_to: ReportsTo::Top,
                    },
                    position.reports_to,
                )
            })
            .unzip();
        let mut department = Department {
            head: head.in_department(&name),
            head_reports_to: ReportsTo::Top,
            positions,
            name,
        };

        // Legacy strings resolve against the fully built position list.
        let resolved: Vec<ReportsTo> = references
            .into_iter()
            .map(|reference| reference.resolve(&department, top_role))
            .collect();
        for (position, reports_to) in department.positions.iter_mut().zip(resolved) {
            position.reports_to = reports_to;
        }
        if let Some(reference) = head_reports_to {
            department.head_reports_to = reference.resolve(&department, top_role);
        }
        department
    }
}

impl ReportsToDocument {
    fn resolve(self, department: &Department, top_role: &str) -> ReportsTo {
        match self {
            Self::Typed(reports_to) => reports_to,
            Self::Legacy(raw) => ReportsTo::from_legacy(&raw, department, top_role),
        }
    }
}
