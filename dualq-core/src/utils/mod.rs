use std::borrow::Cow;

use regex::Regex;

#[cfg(feature = "serde")]
pub(crate) mod serde;

/// Expands `${VAR}` references, unset variables expand to nothing.
pub fn replace_env_var_in_string(input: &str) -> Cow<'_, str> {
    let re = Regex::new(r"\$\{([a-zA-Z_][a-zA-Z0-9_]*)\}").unwrap();
    re.replace_all(input, |caps: &regex::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_default()
    })
}
