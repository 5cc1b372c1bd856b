//! Status conditions, at most one per type.
//!
//! Both the issuer resources and cert-manager's `CertificateRequest` keep their conditions as a
//! list. On a `CertificateRequest` most of them are owned by cert-manager, so their order is left
//! alone.

use stackable_operator::k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};

pub const TYPE_READY: &str = "Ready";

pub const STATUS_TRUE: &str = "True";

/// A condition record that carries a type, a status and a transition timestamp.
pub trait StatusCondition: Clone {
    fn condition_type(&self) -> &str;

    fn status(&self) -> &str;

    fn last_transition_time(&self) -> Option<&Time>;

    fn set_last_transition_time(&mut self, time: Time);
}

impl StatusCondition for Condition {
    fn condition_type(&self) -> &str {
        &self.type_
    }

    fn status(&self) -> &str {
        &self.status
    }

    fn last_transition_time(&self) -> Option<&Time> {
        Some(&self.last_transition_time)
    }

    fn set_last_transition_time(&mut self, time: Time) {
        self.last_transition_time = time;
    }
}

/// Replaces the condition of the same type as `condition` in place, or appends it if there is
/// none. Other conditions keep their order, and later duplicates of the type are dropped.
///
/// The transition time is carried over from the replaced condition if the status is unchanged,
/// and set to `now` otherwise.
pub fn set_condition<C: StatusCondition>(conditions: &mut Vec<C>, mut condition: C, now: Time) {
    let position = conditions
        .iter()
        .position(|current| current.condition_type() == condition.condition_type());
    let transition_time = match position.map(|i| &conditions[i]) {
        Some(current) if current.status() == condition.status() => {
            current.last_transition_time().cloned().unwrap_or(now)
        }
        _ => now,
    };
    condition.set_last_transition_time(transition_time);

    match position {
        Some(position) => {
            let mut index = 0;
            conditions.retain(|current| {
                let keep = index <= position
                    || current.condition_type() != condition.condition_type();
                index += 1;
                keep
            });
            conditions[position] = condition;
        }
        None => conditions.push(condition),
    }
}
