pub(crate) mod fetch;
pub(crate) mod reconcile;
pub(crate) mod search;

use anyhow::Context;
use herbarium::InatClient;

use crate::config::Config;

/// Build the API client from configuration.
pub(crate) fn build_client(config: &Config) -> anyhow::Result<InatClient> {
    let client =
        InatClient::new(config.client_options()).context("failed to create the HTTP client")?;
    if !client.is_authenticated() {
        tracing::info!(
            "{} is not set; requests are unauthenticated",
            herbarium::TOKEN_ENV_VAR
        );
    }
    Ok(client)
}

/// One report line: `id: 'value'`, or `id: None` when there is no value.
pub(crate) fn entry_line(id: u64, value: Option<&str>) -> String {
    match value {
        Some(value) => format!("{id}: '{value}'"),
        None => format!("{id}: None"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_line_quotes_values() {
        assert_eq!(entry_line(1, Some("UWAL-M-100")), "1: 'UWAL-M-100'");
        assert_eq!(entry_line(8, None), "8: None");
        assert_eq!(entry_line(9, Some("")), "9: ''");
    }
}
