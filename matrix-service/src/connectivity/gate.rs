// Readiness Gate
// Evaluates every applicable rule and reports all violations together

use crate::connectivity::connection::Connection;
use crate::connectivity::rules::ConnectionValidationRule;
use crate::error::{ServiceError, ServiceResult};

use std::sync::Arc;

pub struct ReadinessGate;

impl ReadinessGate {
    /// Violations of every applicable rule, in rule order.
    /// Evaluation never stops at the first violation.
    pub fn violations(connection: &dyn Connection, rules: &[Arc<dyn ConnectionValidationRule>]) -> Vec<String> {
        rules
            .iter()
            .filter(|rule| rule.is_applicable(connection))
            .filter_map(|rule| {
                let violation = rule.check(connection);
                if let Some(message) = &violation {
                    tracing::debug!(
                        rule = rule.name(),
                        connection = connection.name(),
                        %message,
                        "Readiness rule violated"
                    );
                }
                violation
            })
            .collect()
    }

    /// Fail with one configuration error listing every violation
    pub fn check(connection: &dyn Connection, rules: &[Arc<dyn ConnectionValidationRule>]) -> ServiceResult<()> {
        let violations = Self::violations(connection, rules);
        if violations.is_empty() {
            Ok(())
        } else {
            Err(ServiceError::Configuration(violations))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectivity::connection::SimulatedConnection;
    use crate::connectivity::rules::ConnectionRunningRule;

    struct AlwaysFails(&'static str);

    impl ConnectionValidationRule for AlwaysFails {
        fn name(&self) -> &str {
            self.0
        }

        fn is_applicable(&self, _connection: &dyn Connection) -> bool {
            true
        }

        fn check(&self, connection: &dyn Connection) -> Option<String> {
            Some(format!("{} rejected '{}'", self.0, connection.name()))
        }
    }

    #[test]
    fn test_all_violations_are_reported_in_rule_order() {
        let rules: Vec<Arc<dyn ConnectionValidationRule>> = vec![
            Arc::new(AlwaysFails("first")),
            Arc::new(ConnectionRunningRule::new()),
            Arc::new(AlwaysFails("second")),
        ];
        let conn = SimulatedConnection::new("gw", "FIX").stopped();

        let err = ReadinessGate::check(&conn, &rules).unwrap_err();
        assert!(err.is_configuration());
        assert_eq!(
            err.problems(),
            &[
                "first rejected 'gw'".to_string(),
                "Connection 'gw' is not running".to_string(),
                "second rejected 'gw'".to_string(),
            ]
        );
    }

    #[test]
    fn test_ready_connection_passes() {
        let rules: Vec<Arc<dyn ConnectionValidationRule>> = vec![Arc::new(ConnectionRunningRule::new())];
        let conn = SimulatedConnection::new("gw", "FIX");
        assert!(ReadinessGate::check(&conn, &rules).is_ok());
    }
}
