use super::RemoteCaller;
use super::config::ShellConfig;
use crate::error::{CiviError, CiviResult};
use crate::models::{ApiReply, Fields};
use std::io::Write;
use std::process::{Command, Stdio};
use std::time::Instant;

/// Keys drush derives itself or rejects on stdin.
const NON_PARAMETERS: [&str; 6] = ["action", "entity", "key", "api_key", "sequential", "json"];

/// Runs API calls through `drush civicrm-api` on the local Drupal install.
pub struct ShellCaller {
    config: ShellConfig,
}

impl ShellCaller {
    pub fn new(config: ShellConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ShellConfig {
        &self.config
    }

    fn command(&self, entity: &str, action: &str) -> Command {
        let mut command = Command::new(&self.config.drush_path);
        command
            .arg("-r")
            .arg(&self.config.root)
            .arg("-l")
            .arg(&self.config.site)
            .arg("civicrm-api")
            .arg("--out=json")
            .arg("--in=json")
            .arg(format!("{entity}.{action}"))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        command
    }
}

/// JSON document written to drush's stdin.
pub fn stdin_payload(params: &Fields) -> CiviResult<Vec<u8>> {
    let payload: serde_json::Map<String, serde_json::Value> = params
        .iter()
        .filter(|(key, _)| !NON_PARAMETERS.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), serde_json::Value::from(value)))
        .collect();
    Ok(serde_json::to_vec(&payload)?)
}

impl RemoteCaller for ShellCaller {
    fn call(&self, entity: &str, action: &str, params: &Fields) -> CiviResult<ApiReply> {
        let started = Instant::now();
        let payload = stdin_payload(params)?;

        let mut child = self.command(entity, action).spawn()?;
        // Always reap the child; a drush that exits early closes stdin under us.
        let written = match child.stdin.take() {
            Some(mut stdin) => stdin.write_all(&payload),
            None => Ok(()),
        };
        let output = child.wait_with_output()?;

        log::debug!(
            "{}.{}: drush exited with {} after {:?}",
            entity,
            action,
            output.status,
            started.elapsed()
        );

        if !output.status.success() {
            let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
            text.push_str(&String::from_utf8_lossy(&output.stderr));
            return Err(CiviError::Shell {
                status: output.status.to_string(),
                output: text.trim().to_string(),
            });
        }
        written?;

        let reply: ApiReply = serde_json::from_slice(&output.stdout)?;
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields;

    #[test]
    fn payload_drops_routing_keys() {
        let params = fields! {
            "entity" => "Contact",
            "action" => "get",
            "api_key" => "secret",
            "sequential" => 1,
            "external_identifier" => "X1",
        };
        let payload: serde_json::Value =
            serde_json::from_slice(&stdin_payload(&params).unwrap()).unwrap();
        assert_eq!(payload, serde_json::json!({"external_identifier": "X1"}));
    }

    #[test]
    fn missing_binary_is_an_io_error() {
        let caller = ShellCaller::new(ShellConfig {
            drush_path: "/nonexistent/drush-binary".into(),
            root: ".".into(),
            site: "default".into(),
        });
        let err = caller.call("Contact", "get", &fields! {}).unwrap_err();
        assert!(matches!(err, CiviError::Io(_)));
        assert!(err.is_transport());
    }
}
