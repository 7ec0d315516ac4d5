use serde::{Deserialize, Serialize};

/// One detected issue at a specific file and line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    #[serde(rename = "type")]
    pub kind: String,
    pub rule_id: String,
    pub location: Location,
    pub metadata: FindingMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub path: String,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub begin: Begin,
}

/// 1-based line number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Begin {
    pub line: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindingMetadata {
    pub description: String,
    pub severity: String,
}

impl Finding {
    pub fn at_line(
        kind: impl Into<String>,
        rule_id: impl Into<String>,
        path: impl Into<String>,
        line: u64,
        metadata: FindingMetadata,
    ) -> Self {
        Self {
            kind: kind.into(),
            rule_id: rule_id.into(),
            location: Location {
                path: path.into(),
                position: Position {
                    begin: Begin { line },
                },
            },
            metadata,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn serializes_with_wire_field_names() {
        let finding = Finding::at_line(
            "sast",
            "G101",
            "config/keys.txt",
            3,
            FindingMetadata {
                description: "Potential hardcoded credentials".into(),
                severity: "HIGH".into(),
            },
        );

        assert_eq!(
            serde_json::to_value(&finding).unwrap(),
            json!({
                "type": "sast",
                "rule_id": "G101",
                "location": {
                    "path": "config/keys.txt",
                    "position": { "begin": { "line": 3 } }
                },
                "metadata": {
                    "description": "Potential hardcoded credentials",
                    "severity": "HIGH"
                }
            })
        );
    }
}
