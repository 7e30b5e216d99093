use crate::types::{Effect, Policy};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyDecision {
    Allow,
    Deny,
    /// No statement matched the action and resource.
    Implicit,
}

pub fn evaluate_policy(policies: &[Policy], action: &str, resource: &str) -> PolicyDecision {
    let mut decision = PolicyDecision::Implicit;

    for statement in policies.iter().flat_map(|p| p.statements.iter()) {
        if !matches_any(&statement.actions, action) || !matches_any(&statement.resources, resource)
        {
            continue;
        }

        match statement.effect {
            Effect::Deny => return PolicyDecision::Deny,
            Effect::Allow => decision = PolicyDecision::Allow,
        }
    }

    decision
}

fn matches_any(patterns: &[String], value: &str) -> bool {
    patterns
        .iter()
        .any(|pattern| wildcard_match(pattern.as_bytes(), value.as_bytes()))
}

// Glob match supporting `*` (any run) and `?` (any single byte).
fn wildcard_match(pattern: &[u8], input: &[u8]) -> bool {
    let (mut p, mut i) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while i < input.len() {
        match pattern.get(p) {
            Some(b'*') => {
                backtrack = Some((p, i));
                p += 1;
            }
            Some(&c) if c == b'?' || c == input[i] => {
                p += 1;
                i += 1;
            }
            _ => match backtrack {
                Some((star, matched)) => {
                    p = star + 1;
                    i = matched + 1;
                    backtrack = Some((star, matched + 1));
                }
                None => return false,
            },
        }
    }

    pattern[p..].iter().all(|&c| c == b'*')
}

#[cfg(test)]
mod tests {
    use crate::types::{Effect, Policy, PolicyStatement};

    use super::{PolicyDecision, evaluate_policy};

    fn statement(effect: Effect, action: &str, resource: &str) -> PolicyStatement {
        PolicyStatement {
            effect,
            actions: vec![action.to_string()],
            resources: vec![resource.to_string()],
        }
    }

    #[test]
    fn deny_overrides_allow() {
        let policies = vec![Policy {
            name: "uploads".to_string(),
            version: "2012-10-17".to_string(),
            statements: vec![
                statement(Effect::Allow, "s3:*", "arn:aws:s3:::photos/*"),
                statement(Effect::Deny, "s3:PutObject", "arn:aws:s3:::photos/*"),
            ],
        }];

        assert_eq!(
            evaluate_policy(&policies, "s3:PutObject", "arn:aws:s3:::photos/*"),
            PolicyDecision::Deny
        );
    }

    #[test]
    fn unmatched_action_is_implicit() {
        let policies = vec![Policy {
            name: "readonly".to_string(),
            version: "2012-10-17".to_string(),
            statements: vec![statement(Effect::Allow, "s3:Get*", "arn:aws:s3:::photos/*")],
        }];

        assert_eq!(
            evaluate_policy(&policies, "s3:GetObject", "arn:aws:s3:::photos/*"),
            PolicyDecision::Allow
        );
        assert_eq!(
            evaluate_policy(&policies, "s3:PutObject", "arn:aws:s3:::photos/*"),
            PolicyDecision::Implicit
        );
    }

    #[test]
    fn single_byte_wildcard() {
        let policies = vec![Policy {
            name: "logs".to_string(),
            version: "2012-10-17".to_string(),
            statements: vec![statement(Effect::Allow, "s3:PutObject", "arn:aws:s3:::log?/*")],
        }];

        assert_eq!(
            evaluate_policy(&policies, "s3:PutObject", "arn:aws:s3:::logs/*"),
            PolicyDecision::Allow
        );
        assert_eq!(
            evaluate_policy(&policies, "s3:PutObject", "arn:aws:s3:::logbook/*"),
            PolicyDecision::Implicit
        );
    }
}
