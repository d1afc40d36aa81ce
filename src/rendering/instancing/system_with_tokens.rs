use std::time::{Duration, Instant};

use glam::Mat4;
use slotmap::SlotMap;

use crate::{
    math::compare::matrix_approx_eq,
    rendering::{
        gpu::GpuBackend,
        instancing::{
            render_system::InstancedRenderSystem,
            token::{InstanceToken, TokenId},
        },
    },
    scene_graph::TransformProvider,
};

/// Token color across the slot, then any per-instance tints on top.
pub(crate) fn write_token_colors(system: &mut InstancedRenderSystem, slot: usize, token: &InstanceToken) {
    system.write_batch_color_at(slot, token.color());
    let tinted = token.count().min(system.batch_size());
    for (offset, &color) in token.instance_colors().iter().take(tinted).enumerate() {
        system.write_instance_color_at(slot, offset, color);
    }
}

/// A system left without appends or erases for this long gets trimmed once.
pub const AUTO_TRIM_IDLE: Duration = Duration::from_secs(150);

/// One render system plus the tokens occupying its slots. `tokens[i]` owns
/// slot `i`, and the token's cached batch index always says so.
pub struct SystemWithTokens {
    system: InstancedRenderSystem,
    tokens: Vec<TokenId>,
    token_local_to_world: Vec<Mat4>,
    last_access: Instant,
}

impl SystemWithTokens {
    pub fn new(system: InstancedRenderSystem) -> Self {
        let capacity = system.batch_capacity();
        Self {
            system,
            tokens: Vec::with_capacity(capacity),
            token_local_to_world: Vec::with_capacity(capacity),
            last_access: Instant::now(),
        }
    }

    pub fn system(&self) -> &InstancedRenderSystem {
        &self.system
    }

    pub fn system_mut(&mut self) -> &mut InstancedRenderSystem {
        &mut self.system
    }

    pub fn tokens(&self) -> &[TokenId] {
        &self.tokens
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Puts the token into a new last slot, doubling the system first if it
    /// is full. Returns the slot.
    pub fn append_token(
        &mut self,
        backend: &mut dyn GpuBackend,
        id: TokenId,
        token: &mut InstanceToken,
        local_to_world: Mat4,
    ) -> usize {
        assert_eq!(
            token.batch_size(),
            self.system.batch_size(),
            "token batch size does not match the system"
        );

        let index = self.system.batch_number();
        assert_eq!(index, self.tokens.len(), "token list out of sync with system");

        if cfg!(debug_assertions) {
            if let Some(previous) = token.batch_index() {
                log::warn!(
                    "Token ({}) appended while still holding index {}",
                    token.dispatcher_name(),
                    previous
                );
            }
        }

        if index + 1 > self.system.batch_capacity() {
            let capacity = self.system.batch_capacity() << 1;
            self.system.setup(backend, capacity);
            log::debug!(
                "Batch size {} system grew to {} slots",
                self.system.batch_size(),
                capacity
            );
        }
        if self.tokens.capacity() < self.system.batch_capacity() {
            let additional = self.system.batch_capacity() - self.tokens.len();
            self.tokens.reserve_exact(additional);
            self.token_local_to_world.reserve_exact(additional);
        }

        self.system.set_batch_number(index + 1);
        self.tokens.push(id);
        self.token_local_to_world.push(local_to_world);
        token.set_batch_index(Some(index));

        self.last_access = Instant::now();
        index
    }

    /// Swap-removes the token at `slot`. The token that was last now lives
    /// at `slot`; its batch index is updated here and its id returned so the
    /// caller can refresh its cached assignment.
    pub fn erase_token_at(
        &mut self,
        slot: usize,
        tokens: &mut SlotMap<TokenId, InstanceToken>,
    ) -> Option<TokenId> {
        assert_eq!(
            self.system.batch_number(),
            self.tokens.len(),
            "token list out of sync with system"
        );
        assert!(
            slot < self.tokens.len(),
            "erase of slot {slot} out of {}",
            self.tokens.len()
        );

        let erased = self.tokens[slot];
        if let Some(token) = tokens.get_mut(erased) {
            debug_assert_eq!(token.batch_index(), Some(slot));
            token.set_batch_index(None);
        }

        self.system.erase_at(slot);
        self.tokens.swap_remove(slot);
        self.token_local_to_world.swap_remove(slot);
        assert_eq!(self.tokens.len(), self.system.batch_number());

        self.last_access = Instant::now();

        let moved = self.tokens.get(slot).copied()?;
        if let Some(token) = tokens.get_mut(moved) {
            token.set_batch_index(Some(slot));
        }
        Some(moved)
    }

    /// Pushes per-frame token state into the system, then updates it.
    pub fn update(
        &mut self,
        backend: &mut dyn GpuBackend,
        tokens: &mut SlotMap<TokenId, InstanceToken>,
        transforms: &dyn TransformProvider,
    ) {
        for (slot, (&id, cached)) in self
            .tokens
            .iter()
            .zip(self.token_local_to_world.iter_mut())
            .enumerate()
        {
            let Some(token) = tokens.get_mut(id) else {
                continue;
            };

            if let Some(local_to_world) = transforms.local_to_world(token.object()) {
                if !matrix_approx_eq(&local_to_world, cached) {
                    *cached = local_to_world;
                    self.system.write_batch_local_to_world_at(slot, local_to_world);
                }
            }

            // Shape changes go through dispatch
            if token.take_volume_updated() {
                self.system.write_local_bounds_at(slot, token.local_bounds());
            }
            if token.take_material_property_updated() {
                write_token_colors(&mut self.system, slot, token);
            }
        }

        self.system.update(backend);
    }

    /// Records a fresh world transform written through dispatch.
    pub(crate) fn cache_local_to_world(&mut self, slot: usize, local_to_world: Mat4) {
        self.token_local_to_world[slot] = local_to_world;
    }

    /// True once per idle period.
    pub fn take_trim_due(&mut self, now: Instant) -> bool {
        if now.saturating_duration_since(self.last_access) > AUTO_TRIM_IDLE {
            self.last_access = now;
            true
        } else {
            false
        }
    }

    pub fn dispose(&mut self, backend: &mut dyn GpuBackend) {
        self.system.dispose(backend);
        self.tokens = Vec::new();
        self.token_local_to_world = Vec::new();
    }
}
