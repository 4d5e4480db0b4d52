//! WD-011: HTTP client for the platform REST API.
//!
//! Entities live under `{host}/api/v1/namespaces/{ns}/{collection}/{name}`;
//! API routes go through the gateway management web actions.

use super::{ClientError, ClientResult, RemoteEntity, WhiskClient};
use crate::core::config::ClientConfig;
use crate::core::types::*;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

/// Page size used when listing collections.
const PAGE_SIZE: usize = 200;

/// Placeholder gateway token when the properties file has none.
pub const DUMMY_APIGW_TOKEN: &str = "DUMMY TOKEN";

const APIMGMT: &str = "web/whisk.system/apimgmt";

/// Blocking REST client.
pub struct HttpClient {
    http: Client,
    host: String,
    namespace: String,
    user: String,
    password: String,
    apigw_token: String,
}

impl HttpClient {
    /// Build a client from resolved configuration.
    pub fn new(cfg: &ClientConfig, insecure: bool, timeout: Duration) -> ClientResult<Self> {
        let (user, password) = cfg
            .auth
            .value
            .split_once(':')
            .ok_or_else(|| ClientError::new(Some(401), "auth key must have the form user:password"))?;
        let host = cfg.api_host.value.trim_end_matches('/');
        let host = if host.starts_with("http://") || host.starts_with("https://") {
            host.to_string()
        } else {
            format!("https://{}", host)
        };
        let http = Client::builder()
            .danger_accept_invalid_certs(insecure)
            .timeout(timeout)
            .build()
            .map_err(|e| ClientError::new(None, format!("cannot build HTTP client: {}", e)))?;
        Ok(Self {
            http,
            host,
            namespace: cfg.namespace.value.clone(),
            user: user.to_string(),
            password: password.to_string(),
            apigw_token: cfg
                .apigw_token
                .clone()
                .unwrap_or_else(|| DUMMY_APIGW_TOKEN.to_string()),
        })
    }

    fn collection_url(&self, collection: &str, name: &str) -> String {
        format!(
            "{}/api/v1/namespaces/{}/{}/{}",
            self.host, self.namespace, collection, name
        )
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        tracing::debug!("{} {}", method, url);
        self.http
            .request(method, url)
            .basic_auth(&self.user, Some(&self.password))
    }

    fn send(&self, builder: RequestBuilder) -> ClientResult<Response> {
        let response = builder
            .send()
            .map_err(|e| ClientError::new(e.status().map(|s| s.as_u16()), e.to_string()))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().unwrap_or_default();
        let message = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|v| v.get("error").and_then(Value::as_str).map(str::to_string))
            .unwrap_or(body);
        Err(ClientError::new(Some(status.as_u16()), message))
    }

    fn put(&self, collection: &str, name: &str, body: &Value) -> ClientResult<()> {
        let url = self.collection_url(collection, name);
        self.send(
            self.request(Method::PUT, &url)
                .query(&[("overwrite", "true")])
                .json(body),
        )?;
        Ok(())
    }

    fn api_url(&self, op: &str) -> String {
        format!("{}/api/v1/{}/{}.http", self.host, APIMGMT, op)
    }

    fn api_doc(&self, route: &ApiRoute) -> Value {
        let (pkg, action) = route
            .action
            .split_once('/')
            .unwrap_or((DEFAULT_PACKAGE, route.action.as_str()));
        let backend = format!(
            "{}/api/v1/web/{}/{}/{}.http",
            self.host, self.namespace, pkg, action
        );
        json!({
            "namespace": self.namespace,
            "gatewayBasePath": route.base_path,
            "gatewayPath": route.rel_path,
            "gatewayMethod": route.method,
            "id": format!("API:{}:{}", self.namespace, route.base_path),
            "apiName": route.api_name,
            "action": {
                "name": route.action,
                "namespace": self.namespace,
                "backendMethod": route.method,
                "backendUrl": backend,
                "authkey": format!("{}:{}", self.user, self.password),
            },
        })
    }
}

/// Entity shape returned by list and get calls.
#[derive(Debug, Deserialize)]
struct WireEntity {
    name: String,
    #[serde(default)]
    namespace: String,
    #[serde(default)]
    publish: bool,
    #[serde(default)]
    annotations: Vec<KeyValue>,
    #[serde(default)]
    parameters: Vec<KeyValue>,
    #[serde(default)]
    exec: Option<Exec>,
    #[serde(default)]
    binding: Option<Value>,
    #[serde(default)]
    trigger: Option<Value>,
    #[serde(default)]
    action: Option<Value>,
}

impl WireEntity {
    fn into_remote(self, kind: EntityKind) -> RemoteEntity {
        RemoteEntity {
            kind: Some(kind),
            namespace: self.namespace,
            name: self.name,
            publish: self.publish,
            annotations: self.annotations.into_iter().map(|kv| (kv.key, kv.value)).collect(),
            parameters: self.parameters,
            exec: self.exec,
            binding: self.binding.as_ref().and_then(binding_from_wire),
            trigger: self.trigger.as_ref().map(path_from_wire),
            action: self.action.as_ref().map(path_from_wire),
        }
    }
}

/// Bindings come back as `{}` for ordinary packages.
fn binding_from_wire(value: &Value) -> Option<Binding> {
    let namespace = value.get("namespace")?.as_str()?;
    let name = value.get("name")?.as_str()?;
    Some(Binding {
        namespace: namespace.to_string(),
        name: name.to_string(),
    })
}

/// Rule endpoints are either strings or `{path, name}` objects.
fn path_from_wire(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => {
            let path = other.get("path").and_then(Value::as_str).unwrap_or_default();
            let name = other.get("name").and_then(Value::as_str).unwrap_or_default();
            format!("/{}/{}", path, name)
        }
    }
}

fn collection(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Package => "packages",
        EntityKind::Action => "actions",
        EntityKind::Trigger => "triggers",
        EntityKind::Rule => "rules",
    }
}

impl WhiskClient for HttpClient {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn list(&self, kind: EntityKind, package: Option<&str>) -> ClientResult<Vec<RemoteEntity>> {
        let path = match (kind, package) {
            (EntityKind::Action, Some(pkg)) => format!("{}/", pkg),
            _ => String::new(),
        };
        let url = self.collection_url(collection(kind), &path);
        let mut all = Vec::new();
        let mut skip = 0;
        loop {
            let page: Vec<WireEntity> = self
                .send(self.request(Method::GET, &url).query(&[
                    ("limit", PAGE_SIZE.to_string()),
                    ("skip", skip.to_string()),
                ]))?
                .json()
                .map_err(|e| ClientError::new(None, format!("malformed list response: {}", e)))?;
            let count = page.len();
            all.extend(page.into_iter().map(|w| w.into_remote(kind)));
            if count < PAGE_SIZE {
                break;
            }
            skip += count;
        }
        Ok(all)
    }

    fn put_package(&self, package: &Package) -> ClientResult<()> {
        let mut body = json!({
            "namespace": self.namespace,
            "name": package.name,
            "version": package.version,
            "publish": package.publish,
            "parameters": params_to_wire(&package.parameters),
            "annotations": annotations_to_wire(&package.annotations),
        });
        if let Some(binding) = &package.binding {
            body["binding"] = json!({ "namespace": binding.namespace, "name": binding.name });
        }
        self.put("packages", &package.name, &body)
    }

    fn put_action(&self, package: Option<&str>, action: &Action) -> ClientResult<()> {
        let name = match package {
            Some(pkg) => format!("{}/{}", pkg, action.name),
            None => action.name.clone(),
        };
        let mut body = json!({
            "namespace": self.namespace,
            "name": action.name,
            "version": action.version,
            "publish": action.publish,
            "exec": action.exec,
            "parameters": params_to_wire(&action.parameters),
            "annotations": annotations_to_wire(&action.annotations),
        });
        if let Some(limits) = action.limits.as_ref().filter(|l| !l.is_empty()) {
            body["limits"] = json!(limits);
        }
        self.put("actions", &name, &body)
    }

    fn put_trigger(&self, trigger: &Trigger) -> ClientResult<()> {
        let body = json!({
            "name": trigger.name,
            "parameters": params_to_wire(&trigger.parameters),
            "annotations": annotations_to_wire(&trigger.annotations),
        });
        self.put("triggers", &trigger.name, &body)
    }

    fn put_rule(&self, rule: &Rule) -> ClientResult<()> {
        let body = json!({
            "name": rule.name,
            "trigger": rule.trigger,
            "action": rule.action,
            "annotations": annotations_to_wire(&rule.annotations),
        });
        self.put("rules", &rule.name, &body)
    }

    fn set_rule_state(&self, name: &str, active: bool) -> ClientResult<()> {
        let url = self.collection_url("rules", name);
        let status = if active { "active" } else { "inactive" };
        self.send(self.request(Method::POST, &url).json(&json!({ "status": status })))?;
        Ok(())
    }

    fn delete(&self, kind: EntityKind, name: &str) -> ClientResult<()> {
        let url = self.collection_url(collection(kind), name);
        self.send(self.request(Method::DELETE, &url))?;
        Ok(())
    }

    fn invoke_feed(&self, feed: &str, params: &Value) -> ClientResult<()> {
        let trimmed = feed.trim_start_matches('/');
        let (ns, rest) = trimmed
            .split_once('/')
            .ok_or_else(|| ClientError::new(Some(400), format!("feed [{}] is not fully qualified", feed)))?;
        let url = format!("{}/api/v1/namespaces/{}/actions/{}", self.host, ns, rest);
        self.send(
            self.request(Method::POST, &url)
                .query(&[("blocking", "true")])
                .json(params),
        )?;
        Ok(())
    }

    fn get_action(&self, name: &str) -> ClientResult<RemoteEntity> {
        let url = self.collection_url("actions", name);
        let wire: WireEntity = self
            .send(self.request(Method::GET, &url).query(&[("code", "true")]))?
            .json()
            .map_err(|e| ClientError::new(None, format!("malformed action response: {}", e)))?;
        Ok(wire.into_remote(EntityKind::Action))
    }

    fn put_api(&self, route: &ApiRoute) -> ClientResult<()> {
        let body = json!({
            "apidoc": self.api_doc(route),
            "accesstoken": self.apigw_token,
            "spaceguid": self.user,
        });
        self.send(
            self.request(Method::POST, &self.api_url("createApi"))
                .query(&[("responsetype", route.response.as_str())])
                .json(&body),
        )?;
        Ok(())
    }

    fn delete_api(&self, route: &ApiRoute) -> ClientResult<()> {
        self.send(self.request(Method::DELETE, &self.api_url("deleteApi")).query(&[
            ("basepath", route.base_path.as_str()),
            ("relpath", route.rel_path.as_str()),
            ("operation", route.method.as_str()),
            ("accesstoken", self.apigw_token.as_str()),
            ("spaceguid", self.user.as_str()),
        ]))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::PropertyValue;

    fn config(host: &str) -> ClientConfig {
        let value = |v: &str| PropertyValue {
            value: v.to_string(),
            source: "test".to_string(),
        };
        ClientConfig {
            auth: value("user:pass"),
            namespace: value("guest"),
            api_host: value(host),
            apigw_token: None,
        }
    }

    #[test]
    fn test_wd011_host_scheme() {
        let c = HttpClient::new(&config("openwhisk.example"), false, Duration::from_secs(5)).unwrap();
        assert_eq!(
            c.collection_url("actions", "pkg/a"),
            "https://openwhisk.example/api/v1/namespaces/guest/actions/pkg/a"
        );
        let c = HttpClient::new(&config("http://localhost:3233/"), false, Duration::from_secs(5)).unwrap();
        assert_eq!(c.api_url("createApi"), "http://localhost:3233/api/v1/web/whisk.system/apimgmt/createApi.http");
    }

    #[test]
    fn test_wd011_bad_auth() {
        let mut cfg = config("h");
        cfg.auth.value = "nocolon".into();
        assert!(HttpClient::new(&cfg, false, Duration::from_secs(5)).is_err());
    }

    #[test]
    fn test_wd011_api_doc() {
        let c = HttpClient::new(&config("h.example"), false, Duration::from_secs(5)).unwrap();
        let route = ApiRoute {
            api_name: "book-club".into(),
            base_path: "/club".into(),
            rel_path: "/books".into(),
            method: "GET".into(),
            action: "library/list".into(),
            response: "json".into(),
        };
        let doc = c.api_doc(&route);
        assert_eq!(doc["id"], "API:guest:/club");
        assert_eq!(doc["gatewayMethod"], "GET");
        assert_eq!(
            doc["action"]["backendUrl"],
            "https://h.example/api/v1/web/guest/library/list.http"
        );
        assert_eq!(c.apigw_token, DUMMY_APIGW_TOKEN);
    }

    #[test]
    fn test_wd011_wire_entity() {
        let raw = r#"{"name":"r1","namespace":"guest","annotations":[{"key":"a","value":1}],
            "trigger":{"path":"guest","name":"t1"},"action":"/guest/p/a"}"#;
        let wire: WireEntity = serde_json::from_str(raw).unwrap();
        let e = wire.into_remote(EntityKind::Rule);
        assert_eq!(e.trigger.as_deref(), Some("/guest/t1"));
        assert_eq!(e.action.as_deref(), Some("/guest/p/a"));
        assert_eq!(e.annotations["a"], 1);

        let pkg: WireEntity = serde_json::from_str(r#"{"name":"p","binding":{}}"#).unwrap();
        assert!(pkg.into_remote(EntityKind::Package).binding.is_none());
    }
}
