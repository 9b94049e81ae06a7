use super::RemoteCaller;
use super::config::RestConfig;
use crate::error::{CiviError, CiviResult};
use crate::models::{ApiReply, Fields, Value};
use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder};
use std::time::{Duration, Instant};

/// Endpoint locations tried, in order, below the site URL.
pub const URL_PATHS: [&str; 3] = [
    "/sites/all/modules/civicrm/extern/rest.php",
    "/libraries/civicrm/extern/rest.php",
    "/civicrm/ajax/rest",
];

const API_VERSION: i64 = 3;

/// Parameters that stay outside the packed `json` field.
const UNPACKED_PARAMS: [&str; 4] = ["api_key", "key", "entity", "action"];

const URL_HINT: &str = "Please check your url configuration. Also try to set \"Extern URL Style\" \
     to \"Prefer standalone scripts\" at civicrm/admin/setting/url.";

/// Blocking REST transport.
pub struct RestCaller {
    http: Client,
    config: RestConfig,
    endpoint: String,
}

impl RestCaller {
    /// Build the HTTP client and locate the REST endpoint.
    pub fn connect(config: RestConfig) -> CiviResult<Self> {
        let http = Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(Duration::from_secs(10))
            .danger_accept_invalid_certs(!config.verify_ssl)
            .user_agent(concat!("civicrm-client/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let mut caller = Self {
            http,
            config,
            endpoint: String::new(),
        };
        caller.endpoint = caller.discover_endpoint()?;
        log::info!("using CiviCRM REST endpoint {}", caller.endpoint);
        Ok(caller)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn config(&self) -> &RestConfig {
        &self.config
    }

    fn discover_endpoint(&self) -> CiviResult<String> {
        let candidates = candidate_endpoints(&self.config.base_url);
        let mut attempts = Vec::with_capacity(candidates.len());

        for candidate in candidates {
            match self.check_endpoint(&candidate) {
                Ok(()) => return Ok(candidate),
                Err(reason) => {
                    log::debug!("endpoint candidate rejected: {}", reason);
                    attempts.push(reason);
                }
            }
        }

        attempts.push(URL_HINT.to_string());
        Err(CiviError::Unreachable { attempts })
    }

    /// A usable endpoint answers a bare GET with 200 or 403 and no redirect.
    fn check_endpoint(&self, url: &str) -> Result<(), String> {
        let mut message = format!("The api is not reachable at: {url}");
        let response = match self.authorize(self.http.get(url)).send() {
            Ok(response) => response,
            Err(err) => {
                message.push_str(&format!("\nAn error occurred: {err}"));
                return Err(message);
            }
        };

        if response.url().as_str() != url {
            message.push_str(&format!("\nWe were redirected to: {}", response.url()));
            return Err(message);
        }

        let status = response.status();
        if status != StatusCode::OK && status != StatusCode::FORBIDDEN {
            message.push_str(&format!("\nError code was: {}", status.as_u16()));
            return Err(message);
        }

        Ok(())
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.config.auth {
            Some(auth) => request.basic_auth(&auth.user, Some(&auth.password)),
            None => request,
        }
    }

    /// Flatten one call into form/query pairs.
    fn build_form(&self, entity: &str, action: &str, params: &Fields) -> CiviResult<Vec<(String, String)>> {
        let mut all: Fields = params.clone();
        all.insert("entity".into(), Value::from(entity));
        all.insert("action".into(), Value::from(action));
        all.insert("api_key".into(), Value::from(self.config.api_key.as_str()));
        all.insert("key".into(), Value::from(self.config.site_key.as_str()));
        all.insert("sequential".into(), Value::Int(1));
        all.insert("json".into(), Value::Int(1));
        all.insert("version".into(), Value::Int(API_VERSION));
        if self.config.debug {
            all.insert("debug".into(), Value::Int(1));
        }

        if !self.config.json_params {
            return Ok(all
                .into_iter()
                .map(|(key, value)| (key, value.to_string()))
                .collect());
        }

        let mut form = Vec::with_capacity(UNPACKED_PARAMS.len() + 1);
        let mut packed = serde_json::Map::new();
        for (key, value) in all {
            if UNPACKED_PARAMS.contains(&key.as_str()) {
                form.push((key, value.to_string()));
            } else if key != "json" {
                packed.insert(key, serde_json::Value::from(&value));
            }
        }
        form.push((
            "json".to_string(),
            serde_json::to_string(&serde_json::Value::Object(packed))?,
        ));
        Ok(form)
    }

    fn uses_post(&self, action: &str) -> bool {
        self.config.force_post || matches!(action, "create" | "delete")
    }
}

impl RemoteCaller for RestCaller {
    fn call(&self, entity: &str, action: &str, params: &Fields) -> CiviResult<ApiReply> {
        let started = Instant::now();
        let form = self.build_form(entity, action, params)?;

        let request = if self.uses_post(action) {
            self.http.post(&self.endpoint).form(&form)
        } else {
            self.http.get(&self.endpoint).query(&form)
        };
        let response = self.authorize(request).send()?;
        let status = response.status();

        log::debug!(
            "{}.{}: HTTP {} after {:?}",
            entity,
            action,
            status.as_u16(),
            started.elapsed()
        );

        if status == StatusCode::URI_TOO_LONG {
            return Err(CiviError::RequestTooLong);
        }
        if status != StatusCode::OK {
            let body = response.text().unwrap_or_default();
            return Err(CiviError::status(status, body));
        }

        let body = response.bytes()?;
        let reply: ApiReply = serde_json::from_slice(&body)?;

        if let Some(Value::String(undefined)) = reply.extra.get("undefined_fields") {
            if undefined != "[]" {
                log::debug!("{}.{}: undefined fields reported: {}", entity, action, undefined);
            }
        }

        Ok(reply)
    }
}

/// Endpoint URLs to try for a configured site URL.
pub fn candidate_endpoints(base_url: &str) -> Vec<String> {
    if base_url.ends_with("extern/rest.php") {
        return vec![base_url.to_string()];
    }

    let trimmed = base_url.trim_end_matches('/');
    let site = trimmed.strip_suffix("/civicrm").unwrap_or(trimmed);
    URL_PATHS
        .iter()
        .map(|path| format!("{site}{path}"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_rest_php_is_used_as_is() {
        let urls = candidate_endpoints("https://crm.example.org/sites/all/modules/civicrm/extern/rest.php");
        assert_eq!(urls, vec!["https://crm.example.org/sites/all/modules/civicrm/extern/rest.php"]);
    }

    #[test]
    fn civicrm_suffix_is_stripped() {
        let urls = candidate_endpoints("https://crm.example.org/civicrm/");
        assert_eq!(urls.len(), 3);
        assert_eq!(urls[0], "https://crm.example.org/sites/all/modules/civicrm/extern/rest.php");
        assert_eq!(urls[2], "https://crm.example.org/civicrm/ajax/rest");
    }
}
