use std::{
    fmt::Debug,
    ops::{Deref, DerefMut},
};

use stackable_operator::k8s_openapi::{
    apimachinery::pkg::apis::meta::v1::Time,
    chrono::{DateTime, Utc},
};

/// Source of the current time, shared by the reconcilers and the provisioners.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    fn now_time(&self) -> Time {
        Time(self.now())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Wrapper for (mostly) secret values that should not be logged.
pub struct Unloggable<T>(pub T);

impl<T> Debug for Unloggable<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("<redacted>")
    }
}

impl<T> Deref for Unloggable<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<T> DerefMut for Unloggable<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}


#[cfg(test)]
mod tests {
    use super::{testing::FixedClock, *};

    #[test]
    fn fixed_clock_only_moves_when_advanced() {
        let clock = FixedClock::at(60);
        assert_eq!(clock.now().timestamp(), 60);
        assert_eq!(clock.now_time(), Time(clock.now()));
        clock.advance(stackable_operator::k8s_openapi::chrono::Duration::seconds(30));
        assert_eq!(clock.now().timestamp(), 90);
    }

    #[test]
    fn unloggable_is_redacted() {
        let secret = Unloggable("hunter2".to_string());
        assert_eq!(format!("{secret:?}"), "<redacted>");
        assert_eq!(secret.len(), 7);
    }
}
