//! Endpoint and placement directive parsing.
//!
//! Placement directives name where a unit should live:
//!
//! ```text
//! directive := "new"
//!            | container ":" ("new" | machine | appref)
//!            | machine
//!            | appref
//! container := lowercase identifier
//! machine   := digit+
//! appref    := app-name ("/" digit+)?
//! ```

use std::fmt;

use crate::error::BundleError;

/// One side of a relation, `application[:relation]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Application name (or a `$deploy-k` placeholder once rewritten).
    pub application: String,
    /// Relation name; empty when the endpoint names the application only.
    pub relation: String,
}

impl Endpoint {
    /// Parses an endpoint from its string form, splitting on the first `:`.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value.split_once(':') {
            Some((application, relation)) => Self {
                application: application.to_string(),
                relation: relation.to_string(),
            },
            None => Self {
                application: value.to_string(),
                relation: String::new(),
            },
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.relation.is_empty() {
            write!(f, "{}", self.application)
        } else {
            write!(f, "{}:{}", self.application, self.relation)
        }
    }
}

/// A parsed placement directive.
///
/// Exactly one of `machine` and `application` is non-empty. `machine` is
/// either the literal `new` or a bundle machine id; `application` targets a
/// unit of another application, with `unit` carrying the explicit unit
/// number when one was given.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Placement {
    /// Target machine: `"new"`, a bundle machine id, or empty.
    pub machine: String,
    /// Container type to place the unit into, or empty.
    pub container_type: String,
    /// Target application name, or empty.
    pub application: String,
    /// Explicit unit number of the target application.
    pub unit: Option<usize>,
}

impl Placement {
    /// Parses a placement directive.
    ///
    /// # Errors
    ///
    /// Returns [`BundleError::InvalidPlacement`] if the directive does not
    /// match the grammar.
    pub fn parse(directive: &str) -> Result<Self, BundleError> {
        let invalid = || BundleError::InvalidPlacement {
            directive: directive.to_string(),
        };

        let (container_type, target) = match directive.split_once(':') {
            Some((container, rest)) => {
                if container.is_empty()
                    || !container.bytes().all(|b| b.is_ascii_lowercase())
                {
                    return Err(invalid());
                }
                (container.to_string(), rest)
            }
            None => (String::new(), directive),
        };

        let mut placement = Self {
            container_type,
            ..Self::default()
        };

        if target == "new" {
            placement.machine = String::from("new");
            return Ok(placement);
        }
        if !target.is_empty() && target.bytes().all(|b| b.is_ascii_digit()) {
            placement.machine = target.to_string();
            return Ok(placement);
        }

        // Application reference, optionally suffixed with a unit number.
        let (name, unit) = match target.split_once('/') {
            Some((name, number)) => {
                let parsed = number.parse::<usize>().map_err(|_| invalid())?;
                (name, Some(parsed))
            }
            None => (target, None),
        };
        if name.is_empty() || name.starts_with(|c: char| c.is_ascii_digit()) {
            return Err(invalid());
        }
        placement.application = name.to_string();
        placement.unit = unit;
        Ok(placement)
    }

    /// True when the directive asks for a fresh machine.
    #[must_use]
    pub fn is_new_machine(&self) -> bool {
        self.machine == "new"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_with_relation() {
        let ep = Endpoint::parse("mediawiki:db");
        assert_eq!(ep.application, "mediawiki");
        assert_eq!(ep.relation, "db");
        assert_eq!(ep.to_string(), "mediawiki:db");
    }

    #[test]
    fn test_endpoint_without_relation() {
        let ep = Endpoint::parse("mysql");
        assert_eq!(ep.application, "mysql");
        assert_eq!(ep.relation, "");
        assert_eq!(ep.to_string(), "mysql");
    }

    #[test]
    fn test_parse_new() {
        let p = Placement::parse("new").unwrap();
        assert_eq!(p.machine, "new");
        assert_eq!(p.container_type, "");
        assert!(p.application.is_empty());
    }

    #[test]
    fn test_parse_container_on_new() {
        let p = Placement::parse("lxd:new").unwrap();
        assert_eq!(p.machine, "new");
        assert_eq!(p.container_type, "lxd");
    }

    #[test]
    fn test_parse_machine() {
        let p = Placement::parse("4").unwrap();
        assert_eq!(p.machine, "4");
        assert!(p.container_type.is_empty());
    }

    #[test]
    fn test_parse_container_on_machine() {
        let p = Placement::parse("kvm:8").unwrap();
        assert_eq!(p.machine, "8");
        assert_eq!(p.container_type, "kvm");
    }

    #[test]
    fn test_parse_application() {
        let p = Placement::parse("mysql").unwrap();
        assert_eq!(p.application, "mysql");
        assert_eq!(p.unit, None);
        assert!(p.machine.is_empty());
    }

    #[test]
    fn test_parse_unit() {
        let p = Placement::parse("keystone/2").unwrap();
        assert_eq!(p.application, "keystone");
        assert_eq!(p.unit, Some(2));
    }

    #[test]
    fn test_parse_container_on_unit() {
        let p = Placement::parse("lxd:mysql/0").unwrap();
        assert_eq!(p.container_type, "lxd");
        assert_eq!(p.application, "mysql");
        assert_eq!(p.unit, Some(0));
    }

    #[test]
    fn test_parse_rejects_bad_directives() {
        for directive in ["", "LXD:new", "lxd:", "app/x", "1app", ":new"] {
            assert!(Placement::parse(directive).is_err(), "{directive}");
        }
    }
}
