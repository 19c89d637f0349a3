use fail::FailScenario;

/// Fail points configured for the lifetime of the value.
///
/// Every configured fail point is switched off again on drop, so a failing assertion does not
/// leak its configuration into the next test.
pub struct FailPointGuard<'a> {
    _scenario: FailScenario<'a>,
    names: Vec<String>,
}

impl<'a> FailPointGuard<'a> {
    /// Configures each `(name, actions)` pair, for example
    /// `(SUBMIT_BULK__BEFORE_COMMIT, "1*return(recoverable)")`.
    ///
    /// # Panics
    ///
    /// Panics when an action string cannot be parsed.
    pub fn setup(fail_points: &[(&str, &str)]) -> FailPointGuard<'a> {
        let scenario = FailScenario::setup();

        let mut names = Vec::with_capacity(fail_points.len());
        for (name, actions) in fail_points {
            if let Err(err) = fail::cfg(*name, actions) {
                panic!("invalid actions `{actions}` for fail point `{name}`: {err}");
            }
            names.push((*name).to_owned());
        }

        Self {
            _scenario: scenario,
            names,
        }
    }

    pub fn teardown(self) {
        drop(self);
    }
}

impl Drop for FailPointGuard<'_> {
    fn drop(&mut self) {
        for name in &self.names {
            // Only invalid action strings are rejected and `off` is valid.
            let _ = fail::cfg(name, "off");
        }
    }
}
