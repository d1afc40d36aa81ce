use std::{collections::HashMap, time::Instant};

use glam::Mat4;
use slotmap::SlotMap;

use crate::{
    rendering::{
        config::{DispatcherConfig, RenderOptions},
        gpu::GpuBackend,
        instancing::{
            dispatcher::{Dispatcher, DispatcherId},
            error::InstancingError,
            level_for_batch_size,
            system_with_tokens::write_token_colors,
            token::{InstanceToken, TokenId},
        },
    },
    scene_graph::{scene::Scene, TransformProvider},
};

/// Where a token currently lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenAssignment {
    pub dispatcher: DispatcherId,
    pub level: usize,
    pub batch_index: usize,
}

/// Owns every dispatcher and token of one scene, plus the name table and the
/// token assignment table that tie them together.
pub struct InstancingWorld<B: GpuBackend, S: TransformProvider = Scene> {
    backend: B,
    scene: S,
    dispatchers: SlotMap<DispatcherId, Dispatcher>,
    names: HashMap<String, DispatcherId>,
    tokens: SlotMap<TokenId, InstanceToken>,
    assignments: HashMap<TokenId, TokenAssignment>,
}

impl<B: GpuBackend, S: TransformProvider> InstancingWorld<B, S> {
    pub fn new(backend: B, scene: S) -> Self {
        Self {
            backend,
            scene,
            dispatchers: SlotMap::with_key(),
            names: HashMap::new(),
            tokens: SlotMap::with_key(),
            assignments: HashMap::new(),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn scene(&self) -> &S {
        &self.scene
    }

    pub fn scene_mut(&mut self) -> &mut S {
        &mut self.scene
    }

    // Dispatchers

    /// Creates a dispatcher and enables it. Fails without creating anything
    /// if a live dispatcher already uses the name.
    pub fn add_dispatcher(
        &mut self,
        config: DispatcherConfig,
    ) -> Result<DispatcherId, InstancingError> {
        if self.names.contains_key(&config.name) {
            return Err(InstancingError::DuplicateDispatcher(config.name));
        }

        let id = self.dispatchers.insert(Dispatcher::new(config));
        self.enable_dispatcher(id)?;
        Ok(id)
    }

    /// Registers the dispatcher under its name and wakes the tokens waiting
    /// for it.
    pub fn enable_dispatcher(&mut self, id: DispatcherId) -> Result<(), InstancingError> {
        let dispatcher = self
            .dispatchers
            .get(id)
            .ok_or(InstancingError::UnknownDispatcher)?;
        if dispatcher.is_active() {
            return Ok(());
        }

        let name = dispatcher.name().to_string();
        if name.is_empty() {
            log::info!("Dispatcher without a name skipped");
            return Ok(());
        }
        if self.names.contains_key(&name) {
            return Err(InstancingError::DuplicateDispatcher(name));
        }

        self.names.insert(name.clone(), id);
        self.dispatchers[id].set_active(true);
        log::debug!("Dispatcher \"{}\" enabled", name);

        let waiting: Vec<TokenId> = self
            .tokens
            .iter()
            .filter(|(_, token)| token.is_active() && token.dispatcher_name() == name)
            .map(|(token_id, _)| token_id)
            .collect();
        for token_id in waiting {
            self.wake_token(token_id);
        }

        Ok(())
    }

    /// Force-removes the tokens drawn by this dispatcher and unregisters its
    /// name. Levels stay allocated.
    pub fn disable_dispatcher(&mut self, id: DispatcherId) -> Result<(), InstancingError> {
        let dispatcher = self
            .dispatchers
            .get(id)
            .ok_or(InstancingError::UnknownDispatcher)?;
        if !dispatcher.is_active() {
            return Ok(());
        }
        let name = dispatcher.name().to_string();

        let assigned: Vec<TokenId> = self
            .assignments
            .iter()
            .filter(|(_, assignment)| assignment.dispatcher == id)
            .map(|(token_id, _)| *token_id)
            .collect();
        for token_id in assigned {
            self.remove_force(token_id);
        }

        self.dispatchers[id].set_active(false);
        if self.names.get(&name) == Some(&id) {
            self.names.remove(&name);
        }
        log::debug!("Dispatcher \"{}\" disabled", name);

        Ok(())
    }

    pub fn destroy_dispatcher(&mut self, id: DispatcherId) -> Result<(), InstancingError> {
        self.disable_dispatcher(id)?;
        if let Some(mut dispatcher) = self.dispatchers.remove(id) {
            dispatcher.dispose_levels(&mut self.backend);
        }
        Ok(())
    }

    pub fn find_dispatcher(&self, name: &str) -> Option<DispatcherId> {
        if name.is_empty() {
            return None;
        }
        self.names.get(name).copied()
    }

    pub fn dispatcher(&self, id: DispatcherId) -> Option<&Dispatcher> {
        self.dispatchers.get(id)
    }

    pub fn dispatchers(&self) -> impl Iterator<Item = (DispatcherId, &Dispatcher)> {
        self.dispatchers.iter()
    }

    pub fn set_render_options(
        &mut self,
        id: DispatcherId,
        options: RenderOptions,
    ) -> Result<(), InstancingError> {
        self.dispatchers
            .get_mut(id)
            .ok_or(InstancingError::UnknownDispatcher)?
            .set_render_options(options);
        Ok(())
    }

    // Tokens

    /// Adds an enabled token and dispatches it if its dispatcher exists.
    pub fn spawn_token(&mut self, token: InstanceToken) -> TokenId {
        let id = self.tokens.insert(token);
        self.tokens[id].set_active(true);
        self.wake_token(id);
        id
    }

    pub fn enable_token(&mut self, id: TokenId) -> Result<(), InstancingError> {
        self.tokens
            .get_mut(id)
            .ok_or(InstancingError::UnknownToken)?
            .set_active(true);
        self.wake_token(id);
        Ok(())
    }

    pub fn disable_token(&mut self, id: TokenId) -> Result<(), InstancingError> {
        self.tokens
            .get_mut(id)
            .ok_or(InstancingError::UnknownToken)?
            .set_active(false);
        self.remove_force(id);
        Ok(())
    }

    pub fn destroy_token(&mut self, id: TokenId) -> Result<InstanceToken, InstancingError> {
        self.remove_force(id);
        self.tokens.remove(id).ok_or(InstancingError::UnknownToken)
    }

    pub fn token(&self, id: TokenId) -> Option<&InstanceToken> {
        self.tokens.get(id)
    }

    /// Raw access. Changes take effect after `check_dispatch`.
    pub fn token_mut(&mut self, id: TokenId) -> Option<&mut InstanceToken> {
        self.tokens.get_mut(id)
    }

    pub fn tokens(&self) -> impl Iterator<Item = (TokenId, &InstanceToken)> {
        self.tokens.iter()
    }

    /// Runs `edit` on the token, then dispatches it.
    pub fn edit_token<R>(
        &mut self,
        id: TokenId,
        edit: impl FnOnce(&mut InstanceToken) -> R,
    ) -> Result<R, InstancingError> {
        let token = self.tokens.get_mut(id).ok_or(InstancingError::UnknownToken)?;
        let result = edit(token);
        self.check_dispatch(id)?;
        Ok(result)
    }

    pub fn set_force_rendering_off(
        &mut self,
        id: TokenId,
        value: bool,
    ) -> Result<(), InstancingError> {
        let token = self.tokens.get_mut(id).ok_or(InstancingError::UnknownToken)?;
        if token.set_force_rendering_off(value) {
            self.check_dispatch(id)?;
        }
        Ok(())
    }

    pub fn make_single_instance(&mut self, id: TokenId) -> Result<(), InstancingError> {
        self.edit_token(id, InstanceToken::make_single_instance)
    }

    pub fn set_instance_offsets(
        &mut self,
        id: TokenId,
        offsets: &[Mat4],
    ) -> Result<(), InstancingError> {
        self.edit_token(id, |token| token.set_instance_offsets(offsets))
    }

    pub fn assignment(&self, id: TokenId) -> Option<TokenAssignment> {
        self.assignments.get(&id).copied()
    }

    fn wake_token(&mut self, id: TokenId) {
        let Some(token) = self.tokens.get_mut(id) else {
            return;
        };
        token.wake_up();
        self.dispatch_or_warn(id);
    }

    fn dispatch_or_warn(&mut self, id: TokenId) {
        if let Err(err) = self.check_dispatch(id) {
            log::warn!("Token not dispatched: {}", err);
        }
    }

    // Assignment

    /// Compares the token's wanted assignment with the recorded one. Equal
    /// means the slot data is rewritten in place; different means the old
    /// slot is released and the token is appended where it now belongs.
    pub fn check_dispatch(&mut self, id: TokenId) -> Result<(), InstancingError> {
        let saved = self.assignments.get(&id).copied();
        let alive = self.tokens.get(id).is_some_and(InstanceToken::is_alive);

        if !alive {
            if let Some(saved) = saved {
                self.assignments.remove(&id);
                self.release(saved);
            }
            return Ok(());
        }

        let (dispatcher, level, batch_index) = {
            let token = &self.tokens[id];
            let name = token.dispatcher_name();
            let dispatcher = self
                .find_dispatcher(name)
                .ok_or_else(|| InstancingError::MissingDispatcher(name.to_string()))?;
            let level = level_for_batch_size(token.batch_size(), name);
            (dispatcher, level, token.batch_index())
        };

        if let Some(saved) = saved {
            if saved.dispatcher == dispatcher
                && saved.level == level
                && Some(saved.batch_index) == batch_index
            {
                self.write_slot(id, saved);
                return Ok(());
            }

            self.assignments.remove(&id);
            self.release(saved);
        }

        let local_to_world = self.local_to_world(id);
        let target = self
            .dispatchers
            .get_mut(dispatcher)
            .ok_or(InstancingError::UnknownDispatcher)?;
        let batch_index = target.get_system_at_level(&mut self.backend, level).append_token(
            &mut self.backend,
            id,
            &mut self.tokens[id],
            local_to_world,
        );

        let assignment = TokenAssignment {
            dispatcher,
            level,
            batch_index,
        };
        self.write_slot(id, assignment);
        self.assignments.insert(id, assignment);

        Ok(())
    }

    /// Releases the token's slot no matter its state.
    pub fn remove_force(&mut self, id: TokenId) {
        if let Some(saved) = self.assignments.remove(&id) {
            self.release(saved);
        }
        if let Some(token) = self.tokens.get_mut(id) {
            token.set_batch_index(None);
        }
    }

    fn release(&mut self, assignment: TokenAssignment) {
        let Some(level) = self
            .dispatchers
            .get_mut(assignment.dispatcher)
            .and_then(|dispatcher| dispatcher.level_mut(assignment.level))
        else {
            return;
        };

        let Some(moved) = level.erase_token_at(assignment.batch_index, &mut self.tokens) else {
            return;
        };

        // The swap put another token into the freed slot
        if let Some(record) = self.assignments.get_mut(&moved) {
            record.batch_index = assignment.batch_index;
        }
        self.dispatch_or_warn(moved);
    }

    fn local_to_world(&self, id: TokenId) -> Mat4 {
        self.tokens
            .get(id)
            .and_then(|token| self.scene.local_to_world(token.object()))
            .unwrap_or(Mat4::IDENTITY)
    }

    fn write_slot(&mut self, id: TokenId, assignment: TokenAssignment) {
        let local_to_world = self.local_to_world(id);
        let Some(token) = self.tokens.get_mut(id) else {
            return;
        };
        let Some(level) = self
            .dispatchers
            .get_mut(assignment.dispatcher)
            .and_then(|dispatcher| dispatcher.level_mut(assignment.level))
        else {
            return;
        };

        let slot = assignment.batch_index;
        level.cache_local_to_world(slot, local_to_world);

        let system = level.system_mut();
        system.write_batch_local_to_world_at(slot, local_to_world);
        system.write_batch_count_at(slot, token.count());
        system.write_local_bounds_at(slot, token.local_bounds());
        system.write_local_offset_at(slot, token.active_local_offsets());
        write_token_colors(system, slot, token);

        token.take_instance_updated();
        token.take_volume_updated();
        token.take_material_property_updated();
    }

    // Frame

    pub fn update(&mut self) {
        self.update_at(Instant::now());
    }

    /// Per-frame tick: syncs token state into every live level, updates and
    /// draws it, then trims levels that have been idle long enough.
    pub fn update_at(&mut self, now: Instant) {
        let mut due = Vec::new();

        for (id, dispatcher) in self.dispatchers.iter_mut() {
            if !dispatcher.is_active() {
                continue;
            }
            for (level, system) in dispatcher.levels_mut() {
                system.update(&mut self.backend, &mut self.tokens, &self.scene);
                if system.take_trim_due(now) {
                    due.push((id, level));
                }
            }
        }

        for (id, level) in due {
            self.trim_level(id, level);
        }
    }

    /// Shrinks token buffers (moving tokens to smaller levels when they
    /// can), then the level's own buffers if it ended up empty.
    fn trim_level(&mut self, dispatcher: DispatcherId, level: usize) {
        let Some(ids) = self
            .dispatchers
            .get(dispatcher)
            .and_then(|d| d.level(level))
            .map(|system| system.tokens().to_vec())
        else {
            return;
        };

        for id in ids.into_iter().rev() {
            let Some(token) = self.tokens.get_mut(id) else {
                continue;
            };
            token.trim_excess();
            if token.take_instance_updated() {
                self.dispatch_or_warn(id);
            }
        }

        if let Some(system) = self
            .dispatchers
            .get_mut(dispatcher)
            .and_then(|d| d.level_mut(level))
        {
            system.system_mut().trim_excess(&mut self.backend);
        }
    }

    /// Trims every registered dispatcher, largest batch size first.
    pub fn trim_excess(&mut self) {
        let registered: Vec<DispatcherId> = self.names.values().copied().collect();
        for dispatcher in registered {
            let levels: Vec<usize> = self
                .dispatchers
                .get(dispatcher)
                .map(|d| d.levels().map(|(level, _)| level).collect())
                .unwrap_or_default();
            for level in levels.into_iter().rev() {
                self.trim_level(dispatcher, level);
            }
        }
    }

    /// Bytes held by the buffers of every registered dispatcher.
    pub fn used_native_memory(&self) -> usize {
        self.names
            .values()
            .filter_map(|&id| self.dispatchers.get(id))
            .map(Dispatcher::used_buffer_memory)
            .sum()
    }

    pub fn visible_number(&self) -> usize {
        self.names
            .values()
            .filter_map(|&id| self.dispatchers.get(id))
            .map(Dispatcher::visible_number)
            .sum()
    }

    /// Throws away every level and both tables, then registers the active
    /// dispatchers again and re-dispatches every enabled token.
    pub fn restart_global(&mut self) {
        for (_, dispatcher) in self.dispatchers.iter_mut() {
            dispatcher.dispose_levels(&mut self.backend);
        }
        self.names.clear();
        self.assignments.clear();

        for (id, dispatcher) in self.dispatchers.iter() {
            let name = dispatcher.name();
            if name.is_empty() || !dispatcher.is_active() {
                continue;
            }
            if self.names.contains_key(name) {
                log::warn!("Duplicate dispatcher \"{}\" skipped", name);
            } else {
                self.names.insert(name.to_string(), id);
            }
        }

        let enabled: Vec<TokenId> = self
            .tokens
            .iter()
            .filter(|(_, token)| token.is_active() && !token.dispatcher_name().is_empty())
            .map(|(id, _)| id)
            .collect();
        for token in self.tokens.values_mut() {
            token.set_batch_index(None);
        }
        for id in enabled {
            self.dispatch_or_warn(id);
        }

        log::info!(
            "Instancing restarted: {} dispatchers, {} tokens",
            self.names.len(),
            self.assignments.len()
        );
    }
}
