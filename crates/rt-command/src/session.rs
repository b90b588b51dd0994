//! Sessions: one runtime's arena, mappers, names and engine.

use std::sync::Arc;

use rt_compile::{
    Command, CompileContext, CompileOptions, CompiledNet, compile, register_core_factories,
};
use rt_core::NameAllocator;
use rt_expr::ExprArena;
use rt_mapping::MapperRegistry;

use crate::engine::ControlCore;
use crate::error::CmdResult;
use crate::handle::CommandHandle;

/// Owns everything needed to turn commands into loaded nets.
///
/// The session is the only allocator of primitive names and inter-net
/// channel keys, so keys stay unique across every net it loads.
pub struct Session {
    arena: ExprArena,
    registry: MapperRegistry,
    names: NameAllocator,
    options: CompileOptions,
    core: Arc<dyn ControlCore>,
}

impl Session {
    /// A session with the built-in value factories registered.
    pub fn new(core: Arc<dyn ControlCore>) -> Self {
        Self::with_options(core, CompileOptions::default())
    }

    pub fn with_options(core: Arc<dyn ControlCore>, options: CompileOptions) -> Self {
        let mut registry = MapperRegistry::new();
        register_core_factories(&mut registry, &options);
        Self {
            arena: ExprArena::new(),
            registry,
            names: NameAllocator::new(),
            options,
            core,
        }
    }

    /// Arena in which command expressions are built.
    pub fn arena(&mut self) -> &mut ExprArena {
        &mut self.arena
    }

    /// Registry for action, driver and value mappers.
    pub fn registry(&mut self) -> &mut MapperRegistry {
        &mut self.registry
    }

    pub fn names(&self) -> &NameAllocator {
        &self.names
    }

    pub fn options(&self) -> &CompileOptions {
        &self.options
    }

    pub fn core(&self) -> &Arc<dyn ControlCore> {
        &self.core
    }

    /// Compile without loading.
    pub fn compile(&mut self, command: &Command) -> CmdResult<CompiledNet> {
        let cx = CompileContext {
            arena: &mut self.arena,
            registry: &self.registry,
            names: &mut self.names,
            options: &self.options,
        };
        Ok(compile(cx, command)?)
    }

    /// Compile and load a command. Compile errors never reach the engine.
    pub fn load(&mut self, command: &Command) -> CmdResult<CommandHandle> {
        let compiled = self.compile(command)?;
        CommandHandle::load(Arc::clone(&self.core), compiled)
    }
}
