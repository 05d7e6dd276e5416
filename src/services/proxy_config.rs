//! Static configuration file of the proxy.
//!
//! Only process-wide settings live in the file. Servers, monitors, services
//! and listeners are created at runtime through the REST API and persisted
//! by the proxy itself.

use std::collections::BTreeMap;
use std::fmt::Write;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::ProxyResource;

pub const TLS_DIR: &str = "/etc/pki";

/// Renders the `[maxscale]` section for `proxy`.
///
/// User parameters override the generated ones.
pub fn render_proxy_config(proxy: &ProxyResource) -> DomainResult<String> {
    let spec = &proxy.spec;
    let mut params: BTreeMap<String, String> = BTreeMap::from([
        ("threads".to_string(), "auto".to_string()),
        ("persist_runtime_changes".to_string(), "true".to_string()),
        ("load_persisted_configs".to_string(), "true".to_string()),
        ("admin_host".to_string(), "0.0.0.0".to_string()),
        ("admin_port".to_string(), spec.admin.port.to_string()),
        ("admin_gui".to_string(), spec.admin.gui_enabled.to_string()),
    ]);

    if spec.tls_enabled() {
        params.insert("admin_ssl_key".to_string(), format!("{TLS_DIR}/admin.key"));
        params.insert("admin_ssl_cert".to_string(), format!("{TLS_DIR}/admin.crt"));
        params.insert("admin_ssl_ca".to_string(), format!("{TLS_DIR}/ca.crt"));
    } else {
        params.insert("admin_secure_gui".to_string(), "false".to_string());
    }

    for (key, value) in &spec.config.params {
        if key.contains(['\n', '=']) || value.contains('\n') {
            return Err(DomainError::ValidationFailed(format!(
                "invalid config parameter '{key}'"
            )));
        }
        params.insert(key.clone(), value.clone());
    }

    let mut out = String::from("[maxscale]\n");
    for (key, value) in &params {
        let _ = writeln!(out, "{key}={value}");
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{ProxySpec, TlsSpec};

    #[test]
    fn test_render_defaults() {
        let proxy = ProxyResource::new("ns", "proxy", ProxySpec::default());
        let config = render_proxy_config(&proxy).unwrap();

        assert!(config.starts_with("[maxscale]\n"));
        assert!(config.contains("admin_port=8989\n"));
        assert!(config.contains("admin_gui=true\n"));
        assert!(config.contains("admin_secure_gui=false\n"));
        assert!(!config.contains("admin_ssl_key"));
    }

    #[test]
    fn test_user_params_override() {
        let mut spec = ProxySpec::default();
        spec.config.params.insert("threads".to_string(), "4".to_string());
        spec.tls = Some(TlsSpec {
            enabled: true,
            ..TlsSpec::default()
        });
        let config = render_proxy_config(&ProxyResource::new("ns", "proxy", spec)).unwrap();

        assert!(config.contains("threads=4\n"));
        assert!(config.contains("admin_ssl_cert=/etc/pki/admin.crt\n"));
        assert!(!config.contains("admin_secure_gui"));
    }

    #[test]
    fn test_rejects_injected_lines() {
        let mut spec = ProxySpec::default();
        spec.config
            .params
            .insert("log_info".to_string(), "true\n[evil]".to_string());
        assert!(render_proxy_config(&ProxyResource::new("ns", "proxy", spec)).is_err());
    }
}
