//! Executor wiring for the configured instances.
//!
//! Each instance in `tessera.toml` names a transport. [`Router`] is a
//! [`RemoteExecutor`] that forwards every call to the executor for that
//! instance's transport, so one engine can serve a mixed fleet.

use crate::config::{Config, Transport};
use anyhow::Result;
use remote::{
    BrokerExecutor, Context, Endpoint, ExecutionResult, RemoteExecutor, SharedExecutor,
    SshExecutor, StaticInventory,
};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub struct Router {
    routes: HashMap<String, SharedExecutor>,
    fallback: Option<SharedExecutor>,
}

impl Router {
    /// Build executors for every transport the config uses.
    ///
    /// Instances missing from the config go over ssh with the instance
    /// name as the host.
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut ssh_inventory = StaticInventory::new();
        let mut broker_inventory = StaticInventory::new();
        let mut transports = HashMap::new();

        for instance in &config.instances {
            let endpoint = instance.endpoint(&config.ssh);
            match instance.transport {
                Transport::Ssh => ssh_inventory.insert(&instance.name, endpoint),
                Transport::Broker => broker_inventory.insert(&instance.name, endpoint),
            }
            transports.insert(instance.name.clone(), instance.transport);
        }

        let ssh: SharedExecutor = Arc::new(SshExecutor::new(
            Arc::new(FallbackInventory(ssh_inventory)),
            config.ssh.options(),
        ));
        let broker: Option<SharedExecutor> = config.broker.as_ref().map(|broker| {
            let mut executor = BrokerExecutor::new(&broker.url, Arc::new(broker_inventory))
                .with_poll_interval(Duration::from_secs(broker.poll_interval_secs));
            if let Some(token) = &broker.token {
                executor = executor.with_token(token);
            }
            Arc::new(executor) as SharedExecutor
        });

        let mut routes = HashMap::new();
        for (name, transport) in transports {
            let executor = match (transport, &broker) {
                (Transport::Broker, Some(broker)) => broker.clone(),
                // Config::validate rejects broker instances without [broker]
                _ => ssh.clone(),
            };
            routes.insert(name, executor);
        }

        Ok(Self {
            routes,
            fallback: Some(ssh),
        })
    }

    /// A router with explicit routes and no fallback.
    pub fn with_routes(routes: HashMap<String, SharedExecutor>) -> Self {
        Self {
            routes,
            fallback: None,
        }
    }

    fn route(&self, instance: &str) -> remote::Result<&SharedExecutor> {
        self.routes
            .get(instance)
            .or(self.fallback.as_ref())
            .ok_or_else(|| remote::Error::UnknownInstance(instance.to_string()))
    }
}

impl RemoteExecutor for Router {
    fn execute(
        &self,
        ctx: &Context,
        instance: &str,
        command: &str,
    ) -> remote::Result<ExecutionResult> {
        self.route(instance)?.execute(ctx, instance, command)
    }

    fn execute_script(
        &self,
        ctx: &Context,
        instance: &str,
        script: &str,
    ) -> remote::Result<ExecutionResult> {
        self.route(instance)?.execute_script(ctx, instance, script)
    }

    fn copy_file(
        &self,
        ctx: &Context,
        instance: &str,
        local_path: &Path,
        remote_path: &str,
    ) -> remote::Result<()> {
        self.route(instance)?
            .copy_file(ctx, instance, local_path, remote_path)
    }

    fn get_file(
        &self,
        ctx: &Context,
        instance: &str,
        remote_path: &str,
        local_path: &Path,
    ) -> remote::Result<()> {
        self.route(instance)?
            .get_file(ctx, instance, remote_path, local_path)
    }
}

/// Resolves unknown instance names as bare hosts.
struct FallbackInventory(StaticInventory);

impl remote::InstanceResolver for FallbackInventory {
    fn resolve(&self, instance: &str) -> remote::Result<Endpoint> {
        match self.0.resolve(instance) {
            Err(remote::Error::UnknownInstance(_)) => {
                log::debug!("{instance} not in inventory, using it as the host");
                Ok(Endpoint::host(instance))
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use remote::{InstanceResolver, ScriptedExecutor};

    #[test]
    fn test_router_dispatches_by_instance() {
        let ssh = Arc::new(ScriptedExecutor::new());
        ssh.respond("hostname", ExecutionResult::ok("ws1\n"));
        let broker = Arc::new(ScriptedExecutor::new());
        broker.respond("hostname", ExecutionResult::ok("gpu1\n"));

        let router = Router::with_routes(HashMap::from([
            ("ws1".to_string(), ssh.clone() as SharedExecutor),
            ("gpu1".to_string(), broker.clone() as SharedExecutor),
        ]));
        let ctx = Context::background();

        assert_eq!(router.execute(&ctx, "ws1", "hostname").unwrap().stdout_trimmed(), "ws1");
        assert_eq!(router.execute(&ctx, "gpu1", "hostname").unwrap().stdout_trimmed(), "gpu1");
        assert_eq!(ssh.calls().len(), 1);
        assert_eq!(broker.calls().len(), 1);
    }

    #[test]
    fn test_router_without_route_is_unknown_instance() {
        let router = Router::with_routes(HashMap::new());
        let err = router
            .execute(&Context::background(), "ghost", "true")
            .unwrap_err();
        assert!(matches!(err, remote::Error::UnknownInstance(name) if name == "ghost"));
    }

    #[test]
    fn test_fallback_inventory_uses_name_as_host() {
        let inventory = FallbackInventory(
            StaticInventory::new().with("ws1", Endpoint::host("10.0.0.7")),
        );
        assert_eq!(inventory.resolve("ws1").unwrap().host, "10.0.0.7");
        assert_eq!(inventory.resolve("build.internal").unwrap().host, "build.internal");
    }

    #[test]
    fn test_from_config_routes_broker_instances() {
        let config = Config::parse(
            r#"
[broker]
url = "http://localhost:9"

[[instances]]
name = "gpu1"
host = "gpu1"
transport = "broker"
"#,
        )
        .unwrap();
        let router = Router::from_config(&config).unwrap();
        assert!(router.routes.contains_key("gpu1"));
        assert!(router.fallback.is_some());
    }
}
