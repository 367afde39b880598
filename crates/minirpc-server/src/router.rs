use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use minirpc_common::protocol::{codes, MethodName, Params, Request, Response, ServiceName};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, warn};

/// Service under which methods registered without a service name live
pub const DEFAULT_SERVICE: &str = "";

/// A registered method.
///
/// Receives the request's `params` array and returns the result value or a
/// failure whose message is sent back to the caller.
pub type Handler = Arc<dyn Fn(Params) -> anyhow::Result<Value> + Send + Sync>;

/// Two-level routing table: `service_name -> method_name -> handler`.
///
/// The table is built before the server starts and shared read-only by every
/// session afterwards, so dispatch takes no locks.
///
/// # Example
///
/// ```
/// use minirpc_server::Router;
/// use serde_json::json;
///
/// let mut router = Router::new();
/// router.register_typed("CalculatorService", "add", |(a, b): (i64, i64)| Ok(a + b));
///
/// let response = router.dispatch("CalculatorService", "add", vec![json!(4), json!(5)]);
/// assert_eq!(response.result, json!(9));
/// ```
#[derive(Clone, Default)]
pub struct Router {
    services: HashMap<ServiceName, HashMap<MethodName, Handler>>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `(service_name, method_name)`, replacing any
    /// previous handler for that pair.
    pub fn register<F>(&mut self, service_name: &str, method_name: &str, handler: F) -> &mut Self
    where
        F: Fn(Params) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        debug!(service = service_name, method = method_name, "Registering handler");
        self.services
            .entry(service_name.to_string())
            .or_default()
            .insert(method_name.to_string(), Arc::new(handler));
        self
    }

    /// Register a method under [`DEFAULT_SERVICE`].
    ///
    /// It answers calls for `method_name` on any service that does not define
    /// the method itself.
    pub fn register_method<F>(&mut self, method_name: &str, handler: F) -> &mut Self
    where
        F: Fn(Params) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.register(DEFAULT_SERVICE, method_name, handler)
    }

    /// Register a handler with typed arguments and result.
    ///
    /// The params array is deserialized into `A` (usually a tuple, e.g.
    /// `(i64, i64)` for `[4, 5]`) and the return value is serialized back to
    /// JSON. Arguments that do not fit `A` fail the call.
    pub fn register_typed<A, R, F>(&mut self, service_name: &str, method_name: &str, handler: F) -> &mut Self
    where
        A: DeserializeOwned,
        R: Serialize,
        F: Fn(A) -> anyhow::Result<R> + Send + Sync + 'static,
    {
        self.register(service_name, method_name, move |params: Params| {
            let args: A = serde_json::from_value(Value::Array(params))
                .map_err(|e| anyhow::anyhow!("Invalid arguments: {}", e))?;
            let result = handler(args)?;
            Ok(serde_json::to_value(result)?)
        })
    }

    /// Handler for `(service_name, method_name)`, falling back to the
    /// method registered under [`DEFAULT_SERVICE`].
    pub fn lookup(&self, service_name: &str, method_name: &str) -> Option<&Handler> {
        self.services
            .get(service_name)
            .and_then(|methods| methods.get(method_name))
            .or_else(|| {
                self.services
                    .get(DEFAULT_SERVICE)
                    .and_then(|methods| methods.get(method_name))
            })
    }

    /// Names of the services with at least one method, excluding
    /// [`DEFAULT_SERVICE`], sorted.
    pub fn services(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .services
            .iter()
            .filter(|(name, methods)| name.as_str() != DEFAULT_SERVICE && !methods.is_empty())
            .map(|(name, _)| name.as_str())
            .collect();
        names.sort_unstable();
        names
    }

    /// Method names registered directly under `service_name`, sorted.
    pub fn methods(&self, service_name: &str) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .services
            .get(service_name)
            .map(|methods| methods.keys().map(String::as_str).collect())
            .unwrap_or_default();
        names.sort_unstable();
        names
    }

    pub fn is_empty(&self) -> bool {
        self.services.values().all(HashMap::is_empty)
    }

    /// Invoke the handler for `(service_name, method_name)`.
    ///
    /// - no handler: `{code: 404, result: "Service not found"}`
    /// - handler error or panic: `{code: 500, result: <message>}`
    /// - success: `{code: 0, result: <value>}`
    pub fn dispatch(&self, service_name: &str, method_name: &str, params: Params) -> Response {
        let Some(handler) = self.lookup(service_name, method_name) else {
            debug!(service = service_name, method = method_name, "No handler registered");
            return Response::error(codes::NOT_FOUND, "Service not found");
        };

        match panic::catch_unwind(AssertUnwindSafe(|| handler(params))) {
            Ok(Ok(value)) => Response::success(value),
            Ok(Err(e)) => {
                warn!(service = service_name, method = method_name, "Handler failed: {:#}", e);
                Response::error(codes::HANDLER_FAULT, format!("{:#}", e))
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(service = service_name, method = method_name, "Handler panicked: {}", message);
                Response::error(codes::HANDLER_FAULT, message)
            }
        }
    }

    pub fn dispatch_request(&self, request: Request) -> Response {
        self.dispatch(&request.service_name, &request.method_name, request.params)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("Handler panicked: {}", message)
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("Handler panicked: {}", message)
    } else {
        "Handler panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn calculator() -> Router {
        let mut router = Router::new();
        router
            .register_typed("CalculatorService", "add", |(a, b): (i64, i64)| Ok(a + b))
            .register_typed("CalculatorService", "div", |(a, b): (i64, i64)| {
                if b == 0 {
                    anyhow::bail!("division by zero");
                }
                Ok(a / b)
            })
            .register("CalculatorService", "boom", |_params| panic!("kaboom"));
        router
    }

    #[test]
    fn test_dispatch_success() {
        let response = calculator().dispatch("CalculatorService", "add", vec![json!(4), json!(5)]);
        assert_eq!(response, Response::success(json!(9)));
    }

    #[test]
    fn test_dispatch_unknown_method_is_404() {
        let router = calculator();

        let response = router.dispatch("CalculatorService", "mul", vec![]);
        assert_eq!(response.code, codes::NOT_FOUND);
        assert_eq!(response.result, json!("Service not found"));

        let response = router.dispatch("Other", "add", vec![json!(1), json!(2)]);
        assert_eq!(response.code, codes::NOT_FOUND);
    }

    #[test]
    fn test_dispatch_handler_error_is_500() {
        let response = calculator().dispatch("CalculatorService", "div", vec![json!(1), json!(0)]);
        assert_eq!(response.code, codes::HANDLER_FAULT);
        assert_eq!(response.error_message(), "division by zero");
    }

    #[test]
    fn test_dispatch_argument_mismatch_is_500() {
        let router = calculator();

        let response = router.dispatch("CalculatorService", "add", vec![json!("four"), json!(5)]);
        assert_eq!(response.code, codes::HANDLER_FAULT);
        assert!(response.error_message().starts_with("Invalid arguments"));

        let response = router.dispatch("CalculatorService", "add", vec![json!(4)]);
        assert_eq!(response.code, codes::HANDLER_FAULT);
    }

    #[test]
    fn test_dispatch_panic_is_500() {
        let router = calculator();

        let response = router.dispatch("CalculatorService", "boom", vec![]);
        assert_eq!(response.code, codes::HANDLER_FAULT);
        assert_eq!(response.error_message(), "Handler panicked: kaboom");

        // Router is still usable afterwards
        let response = router.dispatch("CalculatorService", "add", vec![json!(1), json!(1)]);
        assert_eq!(response.result, json!(2));
    }

    #[test]
    fn test_default_service_fallback() {
        let mut router = Router::new();
        router.register_method("echo", |params| Ok(Value::Array(params)));
        router.register("Special", "echo", |_params| Ok(json!("special")));

        assert_eq!(router.dispatch("", "echo", vec![json!(1)]).result, json!([1]));
        assert_eq!(router.dispatch("Anything", "echo", vec![json!(1)]).result, json!([1]));
        assert_eq!(router.dispatch("Special", "echo", vec![json!(1)]).result, json!("special"));
    }

    #[test]
    fn test_register_replaces_handler() {
        let mut router = Router::new();
        router.register("S", "m", |_| Ok(json!(1)));
        router.register("S", "m", |_| Ok(json!(2)));

        assert_eq!(router.dispatch("S", "m", vec![]).result, json!(2));
    }

    #[test]
    fn test_services_and_methods() {
        let mut router = calculator();
        router.register_method("ping", |_| Ok(json!("pong")));

        assert_eq!(router.services(), vec!["CalculatorService"]);
        assert_eq!(router.methods("CalculatorService"), vec!["add", "boom", "div"]);
        assert_eq!(router.methods(DEFAULT_SERVICE), vec!["ping"]);
        assert!(router.methods("Nope").is_empty());
        assert!(!router.is_empty());
        assert!(Router::new().is_empty());
    }

    #[test]
    fn test_dispatch_request() {
        let request = Request::new("CalculatorService", "add", vec![json!(-3), json!(10)]);
        let response = calculator().dispatch_request(request);
        assert_eq!(response.result, json!(7));
    }
}
