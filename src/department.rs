//! Department routing
//!
//! The department set is closed apart from [`Department::Other`], which holds
//! organisation-specific identifiers (e.g. `company`) and labels read back
//! from older records. All string matching against department names lives in
//! this module.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Department responsible for resolving a complaint
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Department {
    /// Electricity board
    Kseb,
    /// Public works (roads, bridges)
    Pwd,
    /// Water supply and drainage
    WaterAuthority,
    /// Municipal corporation (waste, sanitation, general civic issues)
    Corporation,
    /// Organisation-specific or unrecognised identifier
    Other(String),
}

/// Label used on ledger blocks that carry no department
pub const GENERAL_LABEL: &str = "General";

/// Labels the classification collaborator may answer with verbatim
pub const VALID_LABELS: &[&str] = &["KSEB", "Water Authority", "PWD", "Corporation"];

impl Department {
    /// Department chosen when nothing else matches
    pub const DEFAULT: Department = Department::Corporation;

    /// Display label, as stored in the complaint and ledger tables
    pub fn label(&self) -> &str {
        match self {
            Department::Kseb => "KSEB",
            Department::Pwd => "PWD",
            Department::WaterAuthority => "Water Authority",
            Department::Corporation => "Corporation",
            Department::Other(label) => label,
        }
    }

    /// Exact label lookup. Anything unknown becomes `Other`.
    pub fn from_label(label: &str) -> Self {
        match label.trim() {
            "KSEB" => Department::Kseb,
            "PWD" => Department::Pwd,
            "Water Authority" => Department::WaterAuthority,
            "Corporation" => Department::Corporation,
            other => Department::Other(other.to_string()),
        }
    }

    /// Whether this is one of the four civic departments
    pub fn is_civic(&self) -> bool {
        !matches!(self, Department::Other(_))
    }
}

impl fmt::Display for Department {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl From<String> for Department {
    fn from(label: String) -> Self {
        Department::from_label(&label)
    }
}

impl From<Department> for String {
    fn from(dept: Department) -> Self {
        dept.label().to_string()
    }
}

/// One keyword family of the submission heuristic
struct KeywordFamily {
    label: &'static str,
    keywords: &'static [&'static str],
    categories: &'static [&'static str],
}

/// Families in priority order; the first match wins
const KEYWORD_FAMILIES: &[KeywordFamily] = &[
    KeywordFamily {
        label: "KSEB",
        keywords: &[
            "electricity",
            "power",
            "streetlight",
            "street light",
            "light",
            "pole",
            "transformer",
            "wire",
            "electric",
            "blackout",
            "voltage",
        ],
        categories: &["Streetlight", "Electricity"],
    },
    KeywordFamily {
        label: "PWD",
        keywords: &[
            "road", "pothole", "highway", "bridge", "footpath", "pavement", "crack", "damage",
        ],
        categories: &["Pothole", "Road Damage"],
    },
    KeywordFamily {
        label: "Water Authority",
        keywords: &[
            "water", "leak", "pipe", "drainage", "flood", "sewage", "tap", "supply",
        ],
        categories: &["Water Leak", "Drainage"],
    },
    KeywordFamily {
        label: "Corporation",
        keywords: &[
            "garbage",
            "waste",
            "trash",
            "dustbin",
            "litter",
            "sanitation",
            "cleaning",
            "dump",
        ],
        categories: &["Garbage"],
    },
];

/// Synchronous keyword heuristic over `category + description`
pub fn heuristic_department(category: &str, description: &str) -> Department {
    heuristic_department_or(category, description, &Department::DEFAULT)
}

/// Keyword heuristic that answers `fallback` when no family matches
pub fn heuristic_department_or(
    category: &str,
    description: &str,
    fallback: &Department,
) -> Department {
    let text = format!("{} {}", category, description).to_lowercase();

    KEYWORD_FAMILIES
        .iter()
        .find(|family| {
            family.keywords.iter().any(|kw| text.contains(kw))
                || family.categories.contains(&category)
        })
        .map(|family| Department::from_label(family.label))
        .unwrap_or_else(|| fallback.clone())
}

/// Roles whose complaints are routed to the filing organisation itself
const ORGANISATION_ROLES: &[&str] = &["industry_user", "company"];

/// Identifier used for complaints routed to the filing organisation
pub const ORGANISATION_LABEL: &str = "company";

/// Normalize a department named by the classification collaborator.
///
/// Exact valid labels pass through. Organisation actors get their own
/// identifier, everyone else is fuzzy-matched by substring and defaults to
/// [`Department::DEFAULT`].
pub fn normalize_department(raw: Option<&str>, role: Option<&str>) -> Department {
    normalize_department_or(raw, role, &Department::DEFAULT)
}

/// [`normalize_department`] with a configurable answer for unmatched labels
pub fn normalize_department_or(
    raw: Option<&str>,
    role: Option<&str>,
    fallback: &Department,
) -> Department {
    if let Some(label) = raw.filter(|r| VALID_LABELS.contains(r)) {
        return Department::from_label(label);
    }

    if role.is_some_and(|r| ORGANISATION_ROLES.contains(&r)) {
        return Department::Other(ORGANISATION_LABEL.to_string());
    }

    let Some(lowered) = raw.map(str::to_lowercase) else {
        return fallback.clone();
    };

    if lowered.contains("electricity") || lowered.contains("kseb") {
        Department::Kseb
    } else if lowered.contains("water") {
        Department::WaterAuthority
    } else if lowered.contains("road") || lowered.contains("pwd") {
        Department::Pwd
    } else if lowered.contains("corp") || lowered.contains("waste") {
        Department::Corporation
    } else {
        fallback.clone()
    }
}
