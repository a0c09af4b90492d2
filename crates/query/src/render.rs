use compliance::ComplianceFinding;
use graph::{Entity, Relation};

/// Rough token count used for budgeting: words x 1.3, rounded up.
pub fn estimate_tokens(text: &str) -> usize {
    let words = text.split_whitespace().count();
    (words as f64 * 1.3).ceil() as usize
}

pub fn entity_line(entity: &Entity) -> String {
    let mut line = format!("- {} ({})", entity.canonical_label, entity.entity_type);
    if !entity.attributes.is_empty() {
        let attrs: Vec<String> = entity
            .attributes
            .iter()
            .map(|(k, v)| format!("{k}: {v}"))
            .collect();
        line.push_str(&format!(" [{}]", attrs.join(", ")));
    }
    line
}

pub fn edge_line(edge: &Relation, source_label: &str, target_label: &str) -> String {
    format!("- {} {} {}", source_label, edge.relation_type, target_label)
}

pub fn finding_line(finding: &ComplianceFinding) -> String {
    format!("- [{}] {}: {}", finding.severity, finding.rule_id, finding.message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("one"), 2);
        assert_eq!(estimate_tokens("one two three four five six seven eight nine ten"), 13);
    }
}
