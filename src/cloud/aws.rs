//! `aws` CLI backend.
//!
//! Each operation builds an argument list, spawns the CLI with JSON output and
//! no pager, and parses stdout. A non-zero exit turns stderr into a
//! [`CliFailure`] verbatim so callers can classify it.

use super::{CallerIdentity, CliFailure, CloudCli};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Upper bound on `list-secrets` pages followed in one listing.
const MAX_LIST_PAGES: usize = 50;

#[derive(Deserialize)]
struct SecretListPage {
    #[serde(rename = "SecretList", default)]
    secret_list: Vec<SecretListEntry>,
    #[serde(rename = "NextToken", default)]
    next_token: Option<String>,
}

#[derive(Deserialize)]
struct SecretListEntry {
    #[serde(rename = "Name")]
    name: String,
}

#[derive(Deserialize)]
struct SecretValue {
    #[serde(rename = "SecretString", default)]
    secret_string: Option<String>,
}

#[derive(Deserialize)]
struct ExportedCredentials {
    #[serde(rename = "Expiration", default)]
    expiration: Option<String>,
}

/// Runs the `aws` executable (or whatever `program` points at).
#[derive(Debug, Clone)]
pub struct AwsCli {
    program: String,
}

impl AwsCli {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    async fn run(&self, args: &[String]) -> Result<String, CliFailure> {
        debug!(program = %self.program, command = ?args.first(), "Invoking cloud CLI");

        let output = Command::new(&self.program)
            .args(args)
            .env("AWS_PAGER", "")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    CliFailure::not_installed(format!("`{}` was not found on PATH", self.program))
                } else {
                    CliFailure::not_installed(format!("failed to run `{}`: {}", self.program, e))
                }
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let message = if stderr.is_empty() {
                format!("`{}` exited with status {}", self.program, output.status)
            } else {
                stderr
            };
            return Err(CliFailure::new(message));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl CloudCli for AwsCli {
    fn tool_name(&self) -> &str {
        &self.program
    }

    async fn version(&self) -> Result<String, CliFailure> {
        let out = self.run(&["--version".to_string()]).await?;
        Ok(out.trim().to_string())
    }

    async fn caller_identity(&self, profile: &str) -> Result<CallerIdentity, CliFailure> {
        let out = self.run(&identity_args(profile)).await?;
        parse_identity(&out)
    }

    async fn configured_region(&self, profile: &str) -> Result<Option<String>, CliFailure> {
        // `configure get` exits 1 when the key is unset
        match self.run(&region_args(profile)).await {
            Ok(out) => {
                let region = out.trim();
                Ok((!region.is_empty()).then(|| region.to_string()))
            }
            Err(failure) if failure.not_installed => Err(failure),
            Err(_) => Ok(None),
        }
    }

    async fn session_expiry(&self, profile: &str) -> Result<Option<DateTime<Utc>>, CliFailure> {
        let out = self.run(&export_credentials_args(profile)).await?;
        parse_expiration(&out)
    }

    async fn list_secret_names(
        &self,
        profile: &str,
        region: &str,
    ) -> Result<Vec<String>, CliFailure> {
        let mut names = Vec::new();
        let mut next_token: Option<String> = None;

        for _ in 0..MAX_LIST_PAGES {
            let out = self
                .run(&list_secrets_args(profile, region, next_token.as_deref()))
                .await?;
            let (page, token) = parse_secret_list(&out)?;
            names.extend(page);
            match token {
                Some(t) if !t.is_empty() => next_token = Some(t),
                _ => return Ok(names),
            }
        }

        debug!(pages = MAX_LIST_PAGES, "Stopped following secret list pagination");
        Ok(names)
    }

    async fn secret_string(
        &self,
        profile: &str,
        region: &str,
        name: &str,
    ) -> Result<String, CliFailure> {
        let out = self.run(&get_secret_args(profile, region, name)).await?;
        parse_secret_value(&out)
    }
}

fn scoped(mut args: Vec<String>, profile: &str, region: Option<&str>) -> Vec<String> {
    args.push("--profile".to_string());
    args.push(profile.to_string());
    if let Some(region) = region.filter(|r| !r.is_empty()) {
        args.push("--region".to_string());
        args.push(region.to_string());
    }
    args
}

fn identity_args(profile: &str) -> Vec<String> {
    scoped(
        vec![
            "sts".into(),
            "get-caller-identity".into(),
            "--output".into(),
            "json".into(),
        ],
        profile,
        None,
    )
}

fn region_args(profile: &str) -> Vec<String> {
    scoped(vec!["configure".into(), "get".into(), "region".into()], profile, None)
}

fn export_credentials_args(profile: &str) -> Vec<String> {
    scoped(
        vec![
            "configure".into(),
            "export-credentials".into(),
            "--format".into(),
            "process".into(),
        ],
        profile,
        None,
    )
}

fn list_secrets_args(profile: &str, region: &str, next_token: Option<&str>) -> Vec<String> {
    let mut args = scoped(
        vec![
            "secretsmanager".into(),
            "list-secrets".into(),
            "--output".into(),
            "json".into(),
        ],
        profile,
        Some(region),
    );
    if let Some(token) = next_token {
        args.push("--starting-token".to_string());
        args.push(token.to_string());
    }
    args
}

fn get_secret_args(profile: &str, region: &str, name: &str) -> Vec<String> {
    scoped(
        vec![
            "secretsmanager".into(),
            "get-secret-value".into(),
            "--secret-id".into(),
            name.into(),
            "--output".into(),
            "json".into(),
        ],
        profile,
        Some(region),
    )
}

fn parse_identity(out: &str) -> Result<CallerIdentity, CliFailure> {
    serde_json::from_str(out)
        .map_err(|e| CliFailure::new(format!("unexpected identity output: {}", e)))
}

fn parse_secret_list(out: &str) -> Result<(Vec<String>, Option<String>), CliFailure> {
    let page: SecretListPage = serde_json::from_str(out)
        .map_err(|e| CliFailure::new(format!("unexpected list-secrets output: {}", e)))?;
    let names = page.secret_list.into_iter().map(|s| s.name).collect();
    Ok((names, page.next_token))
}

fn parse_secret_value(out: &str) -> Result<String, CliFailure> {
    let value: SecretValue = serde_json::from_str(out)
        .map_err(|e| CliFailure::new(format!("unexpected get-secret-value output: {}", e)))?;
    value
        .secret_string
        .ok_or_else(|| CliFailure::new("secret has no string payload"))
}

fn parse_expiration(out: &str) -> Result<Option<DateTime<Utc>>, CliFailure> {
    let exported: ExportedCredentials = serde_json::from_str(out)
        .map_err(|e| CliFailure::new(format!("unexpected export-credentials output: {}", e)))?;
    exported
        .expiration
        .map(|s| DateTime::parse_from_rfc3339(&s).map(|dt| dt.with_timezone(&Utc)))
        .transpose()
        .map_err(|e| CliFailure::new(format!("invalid expiration timestamp: {}", e)))
}
