use serde::{Deserialize, Serialize};

use crate::domain::hypothesis::RootSeed;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContenderIssue {
    pub root_id: String,
    pub detail: String,
}

/// Contender-space check. Singleton mode passes trivially; compositional
/// mode requires every named root to declare its component set.
pub fn check_contender_space(seeds: &[RootSeed], compositional: bool) -> Vec<ContenderIssue> {
    if !compositional {
        return Vec::new();
    }
    seeds
        .iter()
        .filter(|seed| seed.components.is_empty())
        .map(|seed| ContenderIssue {
            root_id: seed.root_id.clone(),
            detail: "compositional mode requires a declared component set".to_string(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::check_contender_space;
    use crate::domain::hypothesis::RootSeed;

    fn seed(root_id: &str, components: Vec<String>) -> RootSeed {
        RootSeed {
            root_id: root_id.to_string(),
            statement: format!("{root_id} statement"),
            exclusion_clause: "not the others".to_string(),
            components,
            story_cardinality: None,
        }
    }

    #[test]
    fn singleton_mode_passes_trivially() {
        assert!(check_contender_space(&[seed("H1", Vec::new())], false).is_empty());
    }

    #[test]
    fn compositional_mode_requires_components() {
        let issues = check_contender_space(
            &[
                seed("H1", vec!["pump".to_string(), "valve".to_string()]),
                seed("H2", Vec::new()),
            ],
            true,
        );
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].root_id, "H2");
    }
}
