//! Plugin hook chain seam.
//!
//! The plugin registry itself is an external collaborator; this module only
//! models the shape a hook chain must have so the dispatcher can call into
//! one uniformly regardless of how a real plugin is authored (a default
//! export, a factory function, or a plain object in the source ecosystem).
//! `PluginFactory` is the single trait that shape gets adapted to; this
//! crate ships a no-op chain since no real plugin exists here.

use crate::worker::ipc::{WorkerHttpRequest, WorkerHttpResponse};

/// Outcome of a single hook invocation: either the request continues down
/// the chain, or the hook short-circuits with a response of its own.
pub enum HookOutcome<T> {
    Continue(T),
    Short(WorkerHttpResponse),
}

pub trait RequestHook: Send + Sync {
    fn on_request(&self, req: WorkerHttpRequest) -> HookOutcome<WorkerHttpRequest>;
}

pub trait ResponseHook: Send + Sync {
    fn on_response(&self, resp: WorkerHttpResponse) -> WorkerHttpResponse;
}

/// A plugin contributes zero or more request/response hooks. Mounted-route
/// contribution is out of scope here; only the hook chain is modeled.
pub trait Plugin: Send + Sync {
    fn request_hooks(&self) -> Vec<&dyn RequestHook> {
        Vec::new()
    }

    fn response_hooks(&self) -> Vec<&dyn ResponseHook> {
        Vec::new()
    }
}

/// Adapts whatever shape a real plugin module takes (default export,
/// factory, or object) into a uniform `Plugin` trait object.
pub trait PluginFactory: Send + Sync {
    fn build(&self, config: &serde_json::Value) -> Box<dyn Plugin>;
}

/// Runs the configured plugins' hooks in registration order. Empty by
/// default — no plugin ships with this crate.
#[derive(Default)]
pub struct HookChain {
    plugins: Vec<Box<dyn Plugin>>,
}

impl HookChain {
    pub fn new() -> Self {
        Self { plugins: Vec::new() }
    }

    pub fn register(&mut self, plugin: Box<dyn Plugin>) {
        self.plugins.push(plugin);
    }

    /// Runs `onRequest` hooks until one short-circuits or the chain is
    /// exhausted.
    pub fn run_request(&self, mut req: WorkerHttpRequest) -> HookOutcome<WorkerHttpRequest> {
        for plugin in &self.plugins {
            for hook in plugin.request_hooks() {
                match hook.on_request(req) {
                    HookOutcome::Continue(next) => req = next,
                    short @ HookOutcome::Short(_) => return short,
                }
            }
        }
        HookOutcome::Continue(req)
    }

    /// Runs `onResponse` hooks in order; none of them can short-circuit,
    /// only transform.
    pub fn run_response(&self, mut resp: WorkerHttpResponse) -> WorkerHttpResponse {
        for plugin in &self.plugins {
            for hook in plugin.response_hooks() {
                resp = hook.on_response(resp);
            }
        }
        resp
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::collections::HashMap;

    fn sample_req() -> WorkerHttpRequest {
        WorkerHttpRequest {
            method: "GET".to_string(),
            url: "/".to_string(),
            headers: HashMap::new(),
            body: Bytes::new(),
        }
    }

    #[test]
    fn empty_chain_passes_request_through_unchanged() {
        let chain = HookChain::new();
        match chain.run_request(sample_req()) {
            HookOutcome::Continue(req) => assert_eq!(req.method, "GET"),
            HookOutcome::Short(_) => panic!("empty chain should never short-circuit"),
        }
    }

    struct ShortCircuitHook;
    impl RequestHook for ShortCircuitHook {
        fn on_request(&self, _req: WorkerHttpRequest) -> HookOutcome<WorkerHttpRequest> {
            HookOutcome::Short(WorkerHttpResponse {
                status: 204,
                headers: HashMap::new(),
                body: Bytes::new(),
            })
        }
    }

    struct ShortCircuitPlugin;
    impl Plugin for ShortCircuitPlugin {
        fn request_hooks(&self) -> Vec<&dyn RequestHook> {
            vec![&ShortCircuitHook]
        }
    }

    #[test]
    fn a_short_circuiting_hook_stops_the_chain() {
        let mut chain = HookChain::new();
        chain.register(Box::new(ShortCircuitPlugin));
        match chain.run_request(sample_req()) {
            HookOutcome::Short(resp) => assert_eq!(resp.status, 204),
            HookOutcome::Continue(_) => panic!("hook should have short-circuited"),
        }
    }
}
