// src/categories.rs

//! Repository category taxonomy and pool layout
//!
//! Components declare freedesktop.org menu categories; the repository files
//! them under its own, much smaller, fixed taxonomy.

use crate::db::models::ComponentKind;
use std::collections::BTreeSet;
use std::str::FromStr;

/// A category of the repository taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Category {
    Office,
    Tools,
    Customization,
    Development,
    Graphics,
    Network,
    Science,
    Multimedia,
    Games,
    System,
    Other,
    TechnicalItems,
}

impl Category {
    /// Every category, in seeding order
    pub const ALL: [Category; 12] = [
        Category::Office,
        Category::Tools,
        Category::Customization,
        Category::Development,
        Category::Graphics,
        Category::Network,
        Category::Science,
        Category::Multimedia,
        Category::Games,
        Category::System,
        Category::Other,
        Category::TechnicalItems,
    ];

    /// Stable identifier stored in the `categories` table
    pub fn idname(&self) -> &'static str {
        match self {
            Category::Office => "office",
            Category::Tools => "tools",
            Category::Customization => "customization",
            Category::Development => "development",
            Category::Graphics => "graphics",
            Category::Network => "network",
            Category::Science => "science",
            Category::Multimedia => "multimedia",
            Category::Games => "games",
            Category::System => "system",
            Category::Other => "other",
            Category::TechnicalItems => "components",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Category::Office => "Office",
            Category::Tools => "Tools",
            Category::Customization => "Customization",
            Category::Development => "Development",
            Category::Graphics => "Graphics",
            Category::Network => "Internet",
            Category::Science => "Science",
            Category::Multimedia => "Multimedia",
            Category::Games => "Games",
            Category::System => "System",
            Category::Other => "Other",
            Category::TechnicalItems => "Technical Items",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Category::Office => "Office software",
            Category::Tools => "Helpful utilities",
            Category::Customization => "Customize your OS",
            Category::Development => "Software development",
            Category::Graphics => "Graphics & design",
            Category::Network => "Internet & network",
            Category::Science => "Scientific software",
            Category::Multimedia => "Audio & Video",
            Category::Games => "Games and entertainment",
            Category::System => "System tools",
            Category::Other => "Miscellaneous software",
            Category::TechnicalItems => "Technical items",
        }
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .into_iter()
            .find(|category| category.idname() == s)
            .ok_or_else(|| format!("Invalid category: {}", s))
    }
}

/// freedesktop.org main categories and where they are filed
pub const DESKTOP_CATEGORY_MAP: &[(&str, Category)] = &[
    ("Audio", Category::Multimedia),
    ("AudioVideo", Category::Multimedia),
    ("Video", Category::Multimedia),
    ("Development", Category::Development),
    ("Game", Category::Games),
    ("Graphics", Category::Graphics),
    ("Network", Category::Network),
    ("Office", Category::Customization),
    ("Science", Category::Science),
    ("Settings", Category::Tools),
    ("Utility", Category::Tools),
    ("System", Category::System),
];

/// Look up a single desktop category
pub fn lookup_desktop_category(name: &str) -> Option<Category> {
    DESKTOP_CATEGORY_MAP
        .iter()
        .find(|(desktop, _)| *desktop == name)
        .map(|(_, category)| *category)
}

/// Map a component's declared desktop categories to repository categories
///
/// The result is never empty. Only desktop applications are browsable
/// software; everything else is filed under technical items.
pub fn map_categories<S: AsRef<str>>(kind: ComponentKind, declared: &[S]) -> BTreeSet<Category> {
    if kind != ComponentKind::Desktop {
        return BTreeSet::from([Category::TechnicalItems]);
    }

    let mapped: BTreeSet<Category> = declared
        .iter()
        .filter_map(|name| lookup_desktop_category(name.as_ref().trim()))
        .collect();

    if mapped.is_empty() {
        BTreeSet::from([Category::Other])
    } else {
        mapped
    }
}

/// Reverse-domain prefixes that are reflected in the directory structure
const DOMAIN_LABELS: &[&str] = &["org.", "net.", "com.", "io.", "edu.", "name."];

/// Component id suffix of SDK packages
const SDK_SUFFIX: &str = ".sdk";

/// Build the sharded directory path for a component id
///
/// SDKs are placed alongside their runtime. Reverse-domain ids become
/// `label/subdomain/id`, anything else is sharded by its first one and two
/// characters, so no single directory collects every component.
pub fn build_cpt_path(cid: &str) -> String {
    let cid = cid.strip_suffix(SDK_SUFFIX).unwrap_or(cid);

    if DOMAIN_LABELS.iter().any(|label| cid.starts_with(label)) {
        let parts: Vec<&str> = cid.splitn(3, '.').collect();
        if let [label, subdomain, rest] = parts.as_slice() {
            if !subdomain.is_empty() && !rest.is_empty() {
                return format!("{}/{}/{}", label.to_lowercase(), subdomain, cid);
            }
        }
    }

    let first: String = cid.chars().take(1).collect();
    let first_two: String = cid.chars().take(2).collect();
    format!("{}/{}/{}", first.to_lowercase(), first_two.to_lowercase(), cid)
}
