//! Rhai Rule Engine
//!
//! Rules are written in Rhai, a small sandboxed scripting language embedded in
//! Rust. A script defines any subset of these callbacks:
//!
//! - `risingSigned(id, old, current)` / `fallingSigned(id, old, current)`
//! - `risingUnsigned(id, old, current)` / `fallingUnsigned(id, old, current)`
//! - `edge(id, value)`
//!
//! Callbacks are resolved by exact name and parameter count when the script is
//! (re)loaded. Missing ones are no-ops until the next reload.
//!
//! # Script API
//!
//! ## Timer Actions
//! - `start()` - Start the timer (sends SPLIT, which starts an idle timer)
//! - `split()` - Split
//! - `reset()` - Reset the run
//! - `pause()` - Pause/unpause
//! - `undo()` / `skip()` - Undo or skip a split
//!
//! ## Variables
//! Rhai functions cannot see script globals, so state that must survive
//! between callbacks goes through:
//! - `get_var(name)` - Get a stored variable (`()` if unset)
//! - `set_var(name, value)` - Store a variable
//! - `has_var(name)` - Check if a variable is set
//!
//! ## Logging
//! - `log(message)` / `log_debug(message)`
//!
//! Top-level statements run once per load, so they are the place to seed
//! variables. Integers are Rhai `INT` (i64); unsigned values above `i64::MAX`
//! saturate.

use parking_lot::RwLock;
use rhai::{CallFnOptions, Dynamic, Engine as RhaiVM, FuncArgs, Scope, AST};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::config::EngineLimits;
use crate::dispatcher::{Command, CommandSink};
use crate::rules::RuleEngine;
use crate::{AutosplitterError, Result};

const RISING_SIGNED: &str = "risingSigned";
const FALLING_SIGNED: &str = "fallingSigned";
const RISING_UNSIGNED: &str = "risingUnsigned";
const FALLING_UNSIGNED: &str = "fallingUnsigned";
const EDGE: &str = "edge";

/// Callback names with their required parameter counts
const CALLBACKS: [(&str, usize); 5] = [
    (RISING_SIGNED, 3),
    (FALLING_SIGNED, 3),
    (RISING_UNSIGNED, 3),
    (FALLING_UNSIGNED, 3),
    (EDGE, 2),
];

/// Compiled script plus the callbacks it provides
struct LoadedScript {
    ast: AST,
    callbacks: Vec<&'static str>,
}

impl LoadedScript {
    fn new(ast: AST) -> Self {
        let callbacks = CALLBACKS
            .iter()
            .filter(|(name, arity)| {
                ast.iter_functions()
                    .any(|f| f.name == *name && f.params.len() == *arity)
            })
            .map(|(name, _)| *name)
            .collect();
        Self { ast, callbacks }
    }

    fn has(&self, name: &str) -> bool {
        self.callbacks.contains(&name)
    }
}

/// Rhai-backed rule engine
pub struct RhaiRuleEngine {
    /// The Rhai VM
    vm: RhaiVM,
    /// Current script; swapped whole on reload
    script: RwLock<Option<Arc<LoadedScript>>>,
    /// Variables shared with scripts, kept across reloads
    variables: Arc<RwLock<HashMap<String, Dynamic>>>,
}

impl RhaiRuleEngine {
    /// Create an engine with no script loaded. Timer actions go to `sink`.
    pub fn new(sink: Arc<dyn CommandSink>, limits: &EngineLimits) -> Self {
        let mut vm = RhaiVM::new();

        // Limit script capabilities for safety
        vm.set_max_expr_depths(limits.max_expr_depth, limits.max_expr_depth);
        vm.set_max_call_levels(limits.max_call_levels);
        vm.set_max_operations(limits.max_operations);
        vm.set_max_string_size(limits.max_string_size);
        vm.set_max_array_size(limits.max_array_size);
        vm.set_max_map_size(limits.max_map_size);

        let variables = Arc::new(RwLock::new(HashMap::new()));

        Self::register_timer_functions(&mut vm, sink);
        Self::register_state_functions(&mut vm, variables.clone());

        Self {
            vm,
            script: RwLock::new(None),
            variables,
        }
    }

    fn register_timer_functions(vm: &mut RhaiVM, sink: Arc<dyn CommandSink>) {
        let actions = [
            ("start", Command::Split),
            ("split", Command::Split),
            ("reset", Command::Reset),
            ("pause", Command::Pause),
            ("undo", Command::Undo),
            ("skip", Command::Skip),
        ];

        for (name, command) in actions {
            let sink = sink.clone();
            vm.register_fn(name, move || timer_action(sink.as_ref(), command));
        }
    }

    fn register_state_functions(vm: &mut RhaiVM, variables: Arc<RwLock<HashMap<String, Dynamic>>>) {
        // get_var(name) -> Dynamic
        let vars = variables.clone();
        vm.register_fn("get_var", move |name: &str| -> Dynamic {
            vars.read().get(name).cloned().unwrap_or(Dynamic::UNIT)
        });

        // set_var(name, value)
        let vars = variables.clone();
        vm.register_fn("set_var", move |name: &str, value: Dynamic| {
            vars.write().insert(name.to_string(), value);
        });

        // has_var(name) -> bool
        let vars = variables;
        vm.register_fn("has_var", move |name: &str| -> bool {
            vars.read().contains_key(name)
        });

        vm.register_fn("log", |message: &str| {
            log::info!("[Rhai] {}", message);
        });

        vm.register_fn("log_debug", |message: &str| {
            log::debug!("[Rhai] {}", message);
        });
    }

    /// Compile `source`, run its top-level statements and swap it in.
    ///
    /// On failure the previously loaded script stays active.
    pub fn load(&self, source: &str) -> Result<()> {
        let ast = self
            .vm
            .compile(source)
            .map_err(|e| AutosplitterError::ScriptError(format!("Compilation error: {}", e)))?;

        self.vm
            .run_ast(&ast)
            .map_err(|e| AutosplitterError::ScriptError(format!("Top-level error: {}", e)))?;

        let loaded = LoadedScript::new(ast);
        log::info!("Rule script loaded, callbacks: {:?}", loaded.callbacks);
        *self.script.write() = Some(Arc::new(loaded));
        Ok(())
    }

    /// Load a script from disk
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)?;
        self.load(&source)?;
        log::info!("Rule script read from {}", path.display());
        Ok(())
    }

    /// Callbacks provided by the current script
    pub fn loaded_callbacks(&self) -> Vec<&'static str> {
        self.script
            .read()
            .as_ref()
            .map(|s| s.callbacks.clone())
            .unwrap_or_default()
    }

    pub fn is_loaded(&self) -> bool {
        self.script.read().is_some()
    }

    /// Read a script variable
    pub fn variable(&self, name: &str) -> Option<Dynamic> {
        self.variables.read().get(name).cloned()
    }

    /// Call a script callback, logging and discarding any error
    fn invoke(&self, name: &'static str, args: impl FuncArgs) {
        let Some(script) = self.script.read().clone() else {
            return;
        };
        if !script.has(name) {
            return;
        }

        let options = CallFnOptions::new().eval_ast(false);
        let mut scope = Scope::new();
        let result =
            self.vm
                .call_fn_with_options::<Dynamic>(options, &mut scope, &script.ast, name, args);
        if let Err(e) = result {
            log::warn!("[Rhai] {} failed: {}", name, e);
        }
    }
}

impl RuleEngine for RhaiRuleEngine {
    fn rising_signed(&self, id: &str, old: i64, new: i64) {
        self.invoke(RISING_SIGNED, (id.to_string(), old, new));
    }

    fn falling_signed(&self, id: &str, old: i64, new: i64) {
        self.invoke(FALLING_SIGNED, (id.to_string(), old, new));
    }

    fn rising_unsigned(&self, id: &str, old: u64, new: u64) {
        self.invoke(RISING_UNSIGNED, (id.to_string(), saturate(old), saturate(new)));
    }

    fn falling_unsigned(&self, id: &str, old: u64, new: u64) {
        self.invoke(FALLING_UNSIGNED, (id.to_string(), saturate(old), saturate(new)));
    }

    fn edge(&self, id: &str, new: bool) {
        self.invoke(EDGE, (id.to_string(), new));
    }
}

fn saturate(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn timer_action(sink: &dyn CommandSink, command: Command) {
    match sink.dispatch(command, None) {
        Ok(reply) if reply.is_ok() => log::debug!("[Rhai] {} dispatched", command),
        Ok(reply) => log::warn!("[Rhai] {} refused: {} ({})", command, reply.message, reply.code),
        Err(e) => log::warn!("[Rhai] {} failed: {}", command, e),
    }
}
