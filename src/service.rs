//! Autosplit service
//!
//! Owns the value table and rule engine, and runs both listeners on their own
//! threads.

use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::config::IngestConfig;
use crate::dispatcher::CommandSink;
use crate::listener::{
    CommandListener, CommandProcessor, FactListener, FactProcessor, ListenerHandle,
};
use crate::rules::{RuleDispatcher, RuleEngine};
use crate::values::{ValueSnapshot, ValueTable};
use crate::{AutosplitterError, Result};

#[cfg(feature = "rhai-scripting")]
use crate::engines::rhai_engine::RhaiRuleEngine;

/// Listeners started by [`AutosplitService::start`]
struct Running {
    fact: ListenerHandle,
    command: ListenerHandle,
    fact_addr: SocketAddr,
    command_addr: SocketAddr,
    workers: Vec<JoinHandle<()>>,
}

/// Fact and command ingestion wired to a rule engine and a timer
pub struct AutosplitService {
    config: IngestConfig,
    table: Arc<ValueTable>,
    rules: Arc<dyn RuleEngine>,
    sink: Arc<dyn CommandSink>,
    #[cfg(feature = "rhai-scripting")]
    script_engine: Option<Arc<RhaiRuleEngine>>,
    running: Option<Running>,
}

impl AutosplitService {
    /// Create a service with a Rhai rule engine, loading `config.script_path`
    /// if set
    #[cfg(feature = "rhai-scripting")]
    pub fn new(config: IngestConfig, sink: Arc<dyn CommandSink>) -> Result<Self> {
        let engine = Arc::new(RhaiRuleEngine::new(sink.clone(), &config.engine));
        if let Some(path) = &config.script_path {
            engine.load_file(path)?;
        }

        let mut service = Self::with_engine(config, sink, engine.clone());
        service.script_engine = Some(engine);
        Ok(service)
    }

    /// Create a service without rule scripting; fact changes are tracked but
    /// fire nothing
    #[cfg(not(feature = "rhai-scripting"))]
    pub fn new(config: IngestConfig, sink: Arc<dyn CommandSink>) -> Result<Self> {
        struct NoRules;
        impl RuleEngine for NoRules {}

        Ok(Self::with_engine(config, sink, Arc::new(NoRules)))
    }

    /// Create a service with a caller-supplied rule engine
    pub fn with_engine(
        config: IngestConfig,
        sink: Arc<dyn CommandSink>,
        rules: Arc<dyn RuleEngine>,
    ) -> Self {
        Self {
            config,
            table: Arc::new(ValueTable::new()),
            rules,
            sink,
            #[cfg(feature = "rhai-scripting")]
            script_engine: None,
            running: None,
        }
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    pub fn table(&self) -> &Arc<ValueTable> {
        &self.table
    }

    /// Current fact values, for diagnostics and UI binding
    pub fn snapshot(&self) -> ValueSnapshot {
        self.table.snapshot()
    }

    /// Bind both sockets and spawn the listener threads
    pub fn start(&mut self) -> Result<()> {
        if self.running.is_some() {
            return Err(AutosplitterError::AlreadyRunning);
        }

        let facts = FactProcessor::new(self.table.clone(), RuleDispatcher::new(self.rules.clone()));
        let fact_listener = FactListener::bind(&self.config, facts)?;
        let command_listener =
            CommandListener::bind(&self.config, CommandProcessor::new(self.sink.clone()))?;

        let fact = fact_listener.handle();
        let command = command_listener.handle();
        let fact_addr = fact_listener.local_addr()?;
        let command_addr = command_listener.local_addr()?;

        let mut workers = Vec::with_capacity(2);
        workers.push(
            thread::Builder::new()
                .name("fact-listener".to_string())
                .spawn(move || fact_listener.run())?,
        );

        let spawned = thread::Builder::new()
            .name("command-listener".to_string())
            .spawn(move || command_listener.run());
        match spawned {
            Ok(worker) => workers.push(worker),
            Err(e) => {
                fact.close();
                join_all(workers);
                return Err(e.into());
            }
        }

        log::info!("Autosplitter started: facts on {}, commands on {}", fact_addr, command_addr);
        self.running = Some(Running {
            fact,
            command,
            fact_addr,
            command_addr,
            workers,
        });
        Ok(())
    }

    /// Close both listeners and wait for their threads
    pub fn stop(&mut self) -> Result<()> {
        let running = self.running.take().ok_or(AutosplitterError::NotRunning)?;
        running.fact.close();
        running.command.close();
        join_all(running.workers);
        log::info!("Autosplitter stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Bound fact address while running (resolves port 0)
    pub fn fact_local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|r| r.fact_addr)
    }

    pub fn command_local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|r| r.command_addr)
    }

    /// The Rhai engine, when the service created one
    #[cfg(feature = "rhai-scripting")]
    pub fn script_engine(&self) -> Option<&Arc<RhaiRuleEngine>> {
        self.script_engine.as_ref()
    }

    /// Replace the rule script with `source`
    #[cfg(feature = "rhai-scripting")]
    pub fn load_script(&self, source: &str) -> Result<()> {
        self.rhai()?.load(source)
    }

    /// Reload the script from `config.script_path`
    #[cfg(feature = "rhai-scripting")]
    pub fn reload_script(&self) -> Result<()> {
        let path = self
            .config
            .script_path
            .as_ref()
            .ok_or_else(|| AutosplitterError::Config("no script_path configured".to_string()))?;
        self.rhai()?.load_file(path)
    }

    #[cfg(feature = "rhai-scripting")]
    fn rhai(&self) -> Result<&Arc<RhaiRuleEngine>> {
        self.script_engine.as_ref().ok_or_else(|| {
            AutosplitterError::ScriptError("service uses a custom rule engine".to_string())
        })
    }
}

impl Drop for AutosplitService {
    fn drop(&mut self) {
        if self.running.is_some() {
            let _ = self.stop();
        }
    }
}

fn join_all(workers: Vec<JoinHandle<()>>) {
    for worker in workers {
        let name = worker.thread().name().unwrap_or("listener").to_string();
        if worker.join().is_err() {
            log::error!("{} thread panicked", name);
        }
    }
}
