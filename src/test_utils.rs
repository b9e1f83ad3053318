//! An in-memory stand-in for the Kubernetes API server.
//!
//! Objects are stored as JSON under their full API path. GET, POST, PATCH
//! (merge and server-side apply) and DELETE behave closely enough to the real
//! thing for the reconcilers, and any request can be made to fail once.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use http::{Method, Request, Response};
use http_body_util::BodyExt;
use kube::client::Body;
use kube::{Client, Resource, ResourceExt};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value};
use tower::Service;

#[derive(Default)]
struct Inner {
    objects: HashMap<String, Value>,
    requests: Vec<(Method, String)>,
    failures: Vec<Failure>,
    counter: u64,
}

struct Failure {
    method: Method,
    fragment: String,
    skip: usize,
    code: u16,
}

#[derive(Clone, Default)]
pub struct FakeKube {
    inner: Arc<Mutex<Inner>>,
}

fn object_path<K: Resource<DynamicType = ()>>(namespace: &str, name: &str) -> String {
    format!("{}/{name}", K::url_path(&(), Some(namespace)))
}

impl FakeKube {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn client(&self) -> Client {
        Client::new(self.clone(), "default")
    }

    /// Stores an object as if it had been created through the API
    pub fn seed<K>(&self, object: &K)
    where
        K: Resource<DynamicType = ()> + Serialize,
    {
        let namespace = object.namespace().unwrap_or_else(|| "default".into());
        let path = object_path::<K>(&namespace, &object.name_any());
        let mut value = serde_json::to_value(object).unwrap();
        value["apiVersion"] = K::api_version(&()).into();
        value["kind"] = K::kind(&()).into();

        let mut inner = self.inner.lock().unwrap();
        inner.counter += 1;
        if value["metadata"]["uid"].is_null() {
            value["metadata"]["uid"] = format!("uid-{}", inner.counter).into();
        }
        inner.objects.insert(path, value);
    }

    pub fn get<K>(&self, namespace: &str, name: &str) -> Option<K>
    where
        K: Resource<DynamicType = ()> + DeserializeOwned,
    {
        let inner = self.inner.lock().unwrap();
        inner
            .objects
            .get(&object_path::<K>(namespace, name))
            .map(|value| serde_json::from_value(value.clone()).unwrap())
    }

    pub fn list<K>(&self, namespace: &str) -> Vec<K>
    where
        K: Resource<DynamicType = ()> + DeserializeOwned,
    {
        let prefix = format!("{}/", K::url_path(&(), Some(namespace)));
        let inner = self.inner.lock().unwrap();
        inner
            .objects
            .iter()
            .filter(|(path, _)| path.starts_with(&prefix))
            .map(|(_, value)| serde_json::from_value(value.clone()).unwrap())
            .collect()
    }

    /// Fails the `nth` (1-based) future request whose method matches and whose
    /// path contains `fragment`, with the given status code
    pub fn fail_nth(&self, method: Method, fragment: &str, nth: usize, code: u16) {
        self.inner.lock().unwrap().failures.push(Failure {
            method,
            fragment: fragment.into(),
            skip: nth.saturating_sub(1),
            code,
        });
    }

    pub fn fail_once(&self, method: Method, fragment: &str, code: u16) {
        self.fail_nth(method, fragment, 1, code)
    }

    /// How many requests so far matched the method and contained `fragment`
    pub fn count(&self, method: Method, fragment: &str) -> usize {
        self.inner
            .lock()
            .unwrap()
            .requests
            .iter()
            .filter(|(m, path)| *m == method && path.contains(fragment))
            .count()
    }

    fn handle(&self, method: Method, path: String, content_type: String, body: Vec<u8>) -> (u16, Value) {
        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;
        inner.requests.push((method.clone(), path.clone()));

        if let Some(index) = inner
            .failures
            .iter()
            .position(|f| f.method == method && path.contains(&f.fragment))
        {
            if inner.failures[index].skip == 0 {
                let failure = inner.failures.remove(index);
                return status(failure.code, "InternalError", "injected failure");
            }
            inner.failures[index].skip -= 1;
        }

        let (path, status_subresource) = match path.strip_suffix("/status") {
            Some(path) => (path.to_string(), true),
            None => (path, false),
        };
        let body: Value = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body).unwrap()
        };

        match method {
            Method::GET => match inner.objects.get(&path) {
                Some(object) => (200, object.clone()),
                None => status(404, "NotFound", "not found"),
            },
            Method::DELETE => match inner.objects.remove(&path) {
                Some(object) => (200, object),
                None => status(404, "NotFound", "not found"),
            },
            Method::POST => {
                let mut object = body;
                inner.counter += 1;
                let counter = inner.counter;
                let name = match object["metadata"]["name"].as_str() {
                    Some(name) => name.to_string(),
                    None => format!(
                        "{}{counter}",
                        object["metadata"]["generateName"].as_str().unwrap_or_default()
                    ),
                };
                let path = format!("{path}/{name}");
                if inner.objects.contains_key(&path) {
                    return status(409, "AlreadyExists", "already exists");
                }
                object["metadata"]["name"] = name.into();
                object["metadata"]["uid"] = format!("uid-{counter}").into();
                inner.objects.insert(path, object.clone());
                (201, object)
            }
            Method::PATCH => {
                let apply = content_type.starts_with("application/apply-patch");
                let patch = if status_subresource {
                    json!({ "status": body["status"] })
                } else {
                    let mut body = body;
                    if let Some(body) = body.as_object_mut() {
                        body.remove("status");
                    }
                    body
                };
                match inner.objects.get_mut(&path) {
                    Some(object) => {
                        merge(object, &patch);
                        (200, object.clone())
                    }
                    None if apply && !status_subresource => {
                        let mut object = patch;
                        inner.counter += 1;
                        object["metadata"]["uid"] = format!("uid-{}", inner.counter).into();
                        inner.objects.insert(path, object.clone());
                        (201, object)
                    }
                    None => status(404, "NotFound", "not found"),
                }
            }
            _ => status(405, "MethodNotAllowed", "method not allowed"),
        }
    }
}

/// JSON merge patch (RFC 7386)
fn merge(target: &mut Value, patch: &Value) {
    match patch {
        Value::Object(fields) => {
            if !target.is_object() {
                *target = json!({});
            }
            if let Some(target) = target.as_object_mut() {
                for (key, value) in fields {
                    if value.is_null() {
                        target.remove(key);
                    } else {
                        merge(target.entry(key.clone()).or_insert(Value::Null), value);
                    }
                }
            }
        }
        other => *target = other.clone(),
    }
}

fn status(code: u16, reason: &str, message: &str) -> (u16, Value) {
    (
        code,
        json!({
            "kind": "Status",
            "apiVersion": "v1",
            "metadata": {},
            "status": "Failure",
            "message": message,
            "reason": reason,
            "code": code,
        }),
    )
}

impl Service<Request<Body>> for FakeKube {
    type Response = Response<Body>;
    type Error = tower::BoxError;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let fake = self.clone();
        Box::pin(async move {
            let method = req.method().clone();
            let path = req.uri().path().to_string();
            let content_type = req
                .headers()
                .get(http::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string();
            let body = req.into_body().collect().await?.to_bytes().to_vec();

            let (code, value) = fake.handle(method, path, content_type, body);
            Ok(Response::builder()
                .status(code)
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&value)?))?)
        })
    }
}

#[cfg(test)]
mod tests {
    use k8s_openapi::api::core::v1::ConfigMap;
    use kube::api::{Api, Patch, PatchParams, PostParams};

    use super::*;

    fn config_map(name: &str) -> ConfigMap {
        ConfigMap {
            metadata: kube::api::ObjectMeta {
                name: Some(name.into()),
                namespace: Some("ns".into()),
                ..Default::default()
            },
            data: Some([("a".to_string(), "1".to_string())].into()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_conflict_and_apply() {
        let fake = FakeKube::new();
        let api: Api<ConfigMap> = Api::namespaced(fake.client(), "ns");

        api.create(&PostParams::default(), &config_map("one"))
            .await
            .unwrap();
        let err = api
            .create(&PostParams::default(), &config_map("one"))
            .await
            .unwrap_err();
        assert!(matches!(err, kube::Error::Api(ref e) if e.code == 409));

        api.patch(
            "two",
            &PatchParams::apply("test").force(),
            &Patch::Apply(config_map("two")),
        )
        .await
        .unwrap();
        assert!(fake.get::<ConfigMap>("ns", "two").is_some());
        assert_eq!(fake.list::<ConfigMap>("ns").len(), 2);
    }

    #[tokio::test]
    async fn test_injected_failure_hits_only_the_nth_request() {
        let fake = FakeKube::new();
        fake.seed(&config_map("one"));
        fake.fail_nth(Method::GET, "/configmaps/one", 2, 503);
        let api: Api<ConfigMap> = Api::namespaced(fake.client(), "ns");

        assert!(api.get("one").await.is_ok());
        assert!(api.get("one").await.is_err());
        assert!(api.get("one").await.is_ok());
        assert!(api.get_opt("missing").await.unwrap().is_none());
    }
}
