//! `Label+N` approval specifications.

use std::fmt;
use std::str::FromStr;

use crate::errors::OwnersError;

/// A label vote that counts as code owner approval when at or above `value`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RequiredApproval {
    pub label: String,
    pub value: i16,
}

impl RequiredApproval {
    pub fn new(label: impl Into<String>, value: i16) -> Self {
        Self {
            label: label.into(),
            value,
        }
    }

    pub fn is_satisfied_by(&self, vote: i16) -> bool {
        vote >= self.value
    }
}

impl Default for RequiredApproval {
    fn default() -> Self {
        Self::new("Code-Review", 1)
    }
}

impl fmt::Display for RequiredApproval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}+{}", self.label, self.value)
    }
}

impl FromStr for RequiredApproval {
    type Err = OwnersError;

    fn from_str(spec: &str) -> Result<Self, Self::Err> {
        let spec = spec.trim();
        let Some((label, value)) = spec.rsplit_once('+') else {
            return Err(OwnersError::configuration(format!(
                "invalid approval '{spec}': expected format 'Label+N'"
            )));
        };
        let label = label.trim();
        if label.is_empty() {
            return Err(OwnersError::configuration(format!(
                "invalid approval '{spec}': label is missing"
            )));
        }
        let value: i16 = value.trim().parse().map_err(|_| {
            OwnersError::configuration(format!(
                "invalid approval '{spec}': '{value}' is not a number"
            ))
        })?;
        if value <= 0 {
            return Err(OwnersError::configuration(format!(
                "invalid approval '{spec}': value must be positive"
            )));
        }
        Ok(Self::new(label, value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_required_approval() {
        let approval: RequiredApproval = "Code-Review+2".parse().unwrap();
        assert_eq!(approval, RequiredApproval::new("Code-Review", 2));
        assert_eq!(approval.to_string(), "Code-Review+2");
        assert!(approval.is_satisfied_by(2));
        assert!(!approval.is_satisfied_by(1));
    }

    #[test]
    fn test_reject_malformed_approvals() {
        for spec in ["Code-Review", "+2", "Code-Review+x", "Code-Review+0"] {
            assert!(
                matches!(spec.parse::<RequiredApproval>(), Err(OwnersError::Configuration(_))),
                "{spec} should be rejected"
            );
        }
    }
}
