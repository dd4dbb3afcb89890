//! Command execution

use std::io::{self, BufRead, Write};
use std::sync::Arc;
use anyhow::{Context, Result};
use indexmap::IndexMap;
use log::{debug, info, warn};

use crate::app::host::PluginHost;
use crate::cli::{Args, Command};
use crate::display::{ColourManager, TableBuilder};
use crate::plugin::catalog::{CatalogEntry, InstallOptions};
use crate::plugin::error::PluginError;
use crate::plugin::manifest::InstallSource;
use crate::plugin::permissions::{Capability, PermissionDecision, PermissionRequest, PermissionRequestFlow};

/// Restore installed plugins, then run the requested command
pub async fn execute_command(args: &Args, host: &PluginHost, colours: &ColourManager) -> Result<()> {
    let report = host.restore().await?;
    for (plugin_id, error) in &report.failed {
        eprintln!("{} plugin '{}' failed to activate: {}", colours.warning("warning:"), plugin_id, error);
    }

    match &args.command {
        Command::List => list_plugins(host, colours),
        Command::Install { kind, location, enable, yes, replace } => {
            let source = InstallSource::new(*kind, location.clone());
            let options = InstallOptions { enable: *enable, skip_approval: *yes, replace: *replace };
            install_plugin(host, &source, options, colours).await
        }
        Command::Uninstall { id } => {
            if !host.uninstall(id).await? {
                anyhow::bail!("Plugin '{}' is not installed", id);
            }
            println!("{} {}", colours.success("Uninstalled"), id);
            Ok(())
        }
        Command::Enable { id } => {
            host.enable(id).await?;
            println!("{} {}", colours.success("Enabled"), id);
            Ok(())
        }
        Command::Disable { id } => {
            host.disable(id).await?;
            println!("{} {}", colours.success("Disabled"), id);
            Ok(())
        }
        Command::Permissions { id, grant, revoke, revoke_all } => {
            update_permissions(host, id, grant, revoke, *revoke_all)?;
            print!("{}", permissions_table(host, id, colours)?.build(colours));
            Ok(())
        }
        Command::Settings { id, set, reset } => {
            update_settings(host, id, set, *reset)?;
            print!("{}", settings_table(host, id)?.build(colours));
            Ok(())
        }
        Command::Capabilities => {
            print!("{}", capabilities_table(colours).build(colours));
            Ok(())
        }
    }
}

fn installed(host: &PluginHost, plugin_id: &str) -> Result<CatalogEntry> {
    host.catalog()
        .get(plugin_id)
        .ok_or_else(|| PluginError::plugin_not_found(plugin_id).into())
}

fn status(host: &PluginHost, entry: &CatalogEntry) -> &'static str {
    match host.manager().get_registration(&entry.manifest.id) {
        Some(registration) if registration.enabled => "enabled",
        Some(registration) if registration.error.is_some() => "failed",
        _ => "disabled",
    }
}

pub fn plugins_table(host: &PluginHost) -> TableBuilder {
    host.catalog().list().iter().fold(
        TableBuilder::new().headers(["ID", "NAME", "VERSION", "TYPE", "SOURCE", "STATUS"]),
        |table, entry| {
            table.add_row(vec![
                entry.manifest.id.clone(),
                entry.manifest.name.clone(),
                entry.manifest.version.clone(),
                entry.manifest.plugin_type.to_string(),
                entry.source.kind.to_string(),
                status(host, entry).to_string(),
            ])
        },
    )
}

fn list_plugins(host: &PluginHost, colours: &ColourManager) -> Result<()> {
    let table = plugins_table(host);
    if table.is_empty() {
        println!("{}", colours.muted("No plugins installed"));
    } else {
        print!("{}", table.build(colours));
    }
    Ok(())
}

async fn install_plugin(
    host: &PluginHost,
    source: &InstallSource,
    options: InstallOptions,
    colours: &ColourManager,
) -> Result<()> {
    let prompt = (!options.skip_approval).then(|| tokio::spawn(answer_requests(Arc::clone(host.approvals()))));
    let outcome = host.install(source, options).await;
    if let Some(prompt) = prompt {
        prompt.abort();
    }

    match (outcome.success, outcome.plugin_id, outcome.error) {
        (true, Some(plugin_id), _) => {
            let state = if host.manager().is_enabled(&plugin_id) { "enabled" } else { "disabled" };
            println!("{} {} ({})", colours.success("Installed"), plugin_id, state);
            if let Some(error) = host.manager().get_registration(&plugin_id).and_then(|r| r.error) {
                println!("{} {}", colours.warning("Activation failed:"), error);
            }
            Ok(())
        }
        (_, _, error) => anyhow::bail!(
            "Install from {} failed: {}",
            source,
            error.unwrap_or_else(|| "unknown error".to_string())
        ),
    }
}

/// Answer approval requests from the terminal, one capability at a time
async fn answer_requests(approvals: Arc<PermissionRequestFlow>) {
    loop {
        let request = approvals.next_request().await;
        let request_id = request.request_id;
        let decision = match tokio::task::spawn_blocking(move || prompt_for(&request)).await {
            Ok(Ok(decision)) => decision,
            Ok(Err(e)) => {
                warn!("Could not read approval answer: {}", e);
                PermissionDecision::deny()
            }
            Err(e) => {
                warn!("Approval prompt stopped: {}", e);
                PermissionDecision::deny()
            }
        };
        if let Err(e) = approvals.respond(request_id, decision) {
            debug!("Approval for request {} not delivered: {}", request_id, e);
        }
    }
}

fn prompt_for(request: &PermissionRequest) -> io::Result<PermissionDecision> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    writeln!(stdout, "Plugin '{}' ({}) requests:", request.plugin_name, request.plugin_id)?;

    let mut granted = Vec::new();
    for capability in &request.requested_permissions {
        write!(
            stdout,
            "  {} [{} risk] {}\n  Allow? [y/N] ",
            capability,
            capability.risk(),
            capability.description()
        )?;
        stdout.flush()?;
        let mut answer = String::new();
        stdin.lock().read_line(&mut answer)?;
        if is_yes(&answer) {
            granted.push(*capability);
        }
    }

    Ok(if granted.is_empty() {
        PermissionDecision::deny()
    } else {
        PermissionDecision::approve(granted)
    })
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}

/// Grants are limited to what the manifest declares
pub fn update_permissions(
    host: &PluginHost,
    plugin_id: &str,
    grant: &[Capability],
    revoke: &[Capability],
    revoke_all: bool,
) -> Result<()> {
    let entry = installed(host, plugin_id)?;
    let undeclared: Vec<String> = grant
        .iter()
        .filter(|capability| !entry.manifest.requests(**capability))
        .map(ToString::to_string)
        .collect();
    if !undeclared.is_empty() {
        anyhow::bail!("Plugin '{}' does not declare: {}", plugin_id, undeclared.join(", "));
    }

    if revoke_all {
        host.permissions().revoke_permissions(plugin_id)?;
        info!("Revoked every capability of '{}'", plugin_id);
        return Ok(());
    }
    if !grant.is_empty() {
        host.permissions().grant_permissions(plugin_id, grant)?;
    }
    for capability in revoke {
        host.permissions().revoke_permission(plugin_id, *capability)?;
    }
    Ok(())
}

pub fn permissions_table(host: &PluginHost, plugin_id: &str, colours: &ColourManager) -> Result<TableBuilder> {
    let entry = installed(host, plugin_id)?;
    Ok(entry.manifest.permissions.iter().fold(
        TableBuilder::new().headers(["CAPABILITY", "RISK", "GRANTED"]),
        |table, capability| {
            let granted = host.permissions().has_permission(plugin_id, *capability);
            table.add_row(vec![
                capability.to_string(),
                colours.risk(capability.risk()).to_string(),
                if granted { "yes" } else { "no" }.to_string(),
            ])
        },
    ))
}

fn update_settings(host: &PluginHost, plugin_id: &str, set: &[(String, serde_json::Value)], reset: bool) -> Result<()> {
    if reset {
        host.reset_settings(plugin_id)?;
        info!("Restored default settings of '{}'", plugin_id);
    } else if !set.is_empty() {
        let values: IndexMap<_, _> = set.iter().cloned().collect();
        let saved = host
            .update_settings(plugin_id, values)
            .with_context(|| format!("Settings of '{}' were not saved", plugin_id))?;
        debug!("Saved {} settings of '{}'", saved, plugin_id);
    }
    Ok(())
}

pub fn settings_table(host: &PluginHost, plugin_id: &str) -> Result<TableBuilder> {
    let entry = installed(host, plugin_id)?;
    let values = host.settings_editor(plugin_id)?.effective_values();
    Ok(entry.manifest.settings.iter().fold(
        TableBuilder::new().headers(["KEY", "TYPE", "VALUE", "DEFAULT"]),
        |table, declaration| {
            let value = values.get(&declaration.key).map(ToString::to_string).unwrap_or_default();
            table.add_row(vec![
                declaration.key.clone(),
                format!("{:?}", declaration.setting_type).to_lowercase(),
                value,
                declaration.default.to_string(),
            ])
        },
    ))
}

pub fn capabilities_table(colours: &ColourManager) -> TableBuilder {
    Capability::ALL.iter().fold(
        TableBuilder::new().headers(["CAPABILITY", "RISK", "DESCRIPTION"]),
        |table, capability| {
            table.add_row(vec![
                capability.to_string(),
                colours.risk(capability.risk()).to_string(),
                capability.description().to_string(),
            ])
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use serde_json::json;

    use crate::config::RuntimeConfig;
    use crate::plugin::storage::MemoryStorage;
    use crate::plugin::tests::mocks::{manifest_json, MockHost};

    async fn host_with(manifest: serde_json::Value) -> PluginHost {
        let config = RuntimeConfig { permission_timeout: Duration::from_secs(5), ..RuntimeConfig::default() };
        let host = PluginHost::new(Arc::new(MemoryStorage::new()), Arc::new(MockHost::default()), config).unwrap();
        host.register_builtin(manifest, None).unwrap();
        let options = InstallOptions { enable: true, skip_approval: true, replace: false };
        assert!(host.install(&InstallSource::builtin("notes"), options).await.success);
        host
    }

    #[test]
    fn test_yes_answers() {
        assert!(is_yes("y\n"));
        assert!(is_yes(" YES "));
        assert!(!is_yes("\n"));
        assert!(!is_yes("nope"));
    }

    #[tokio::test]
    async fn test_plugins_table_shows_status() {
        let host = host_with(manifest_json("notes", "panel", &[])).await;

        let output = plugins_table(&host).build(&ColourManager::with_colours(false));
        let row = output.lines().nth(2).unwrap();
        assert!(row.contains("notes"));
        assert!(row.contains("builtin"));
        assert!(row.ends_with("enabled"));
    }

    #[tokio::test]
    async fn test_grants_limited_to_declared() {
        let host = host_with(manifest_json("notes", "panel", &["read-files", "shell"])).await;

        assert!(update_permissions(&host, "notes", &[Capability::Network], &[], false).is_err());

        update_permissions(&host, "notes", &[], &[Capability::Shell], false).unwrap();
        assert_eq!(host.permissions().get_permissions("notes"), vec![Capability::ReadFiles]);

        update_permissions(&host, "notes", &[Capability::Shell], &[], false).unwrap();
        assert!(host.permissions().has_permission("notes", Capability::Shell));

        update_permissions(&host, "notes", &[], &[], true).unwrap();
        assert!(host.permissions().get_permissions("notes").is_empty());

        let table = permissions_table(&host, "notes", &ColourManager::with_colours(false)).unwrap();
        let output = table.build(&ColourManager::with_colours(false));
        assert_eq!(output.lines().count(), 4);
        assert!(output.lines().all(|line| !line.ends_with("yes")));
    }

    #[tokio::test]
    async fn test_settings_update_and_table() {
        let mut manifest = manifest_json("notes", "panel", &[]);
        manifest["settings"] = json!([{ "key": "limit", "type": "number", "default": 10, "max": 20 }]);
        let host = host_with(manifest).await;

        assert!(update_settings(&host, "notes", &[("limit".to_string(), json!(50))], false).is_err());
        update_settings(&host, "notes", &[("limit".to_string(), json!(15))], false).unwrap();

        let output = settings_table(&host, "notes").unwrap().build(&ColourManager::with_colours(false));
        assert_eq!(output.lines().nth(2).unwrap(), " limit number 15    10");
    }

    #[test]
    fn test_capabilities_table_lists_all() {
        let output = capabilities_table(&ColourManager::with_colours(false)).build(&ColourManager::with_colours(false));
        assert_eq!(output.lines().count(), Capability::ALL.len() + 2);
    }
}
