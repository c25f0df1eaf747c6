//! Runtime search parameters.

use cz_core::config::SearchSection;

/// Root Dirichlet noise settings (self-play exploration).
#[derive(Clone, Copy, Debug)]
pub struct RootNoise {
    pub alpha: f32,
    pub epsilon: f32,
    pub seed: u64,
}

#[derive(Clone, Debug)]
pub struct SearchParams {
    /// CPUCT = base + factor * ln((N + init + 1) / init), with separate
    /// constants at the root.
    pub cpuct_base: f32,
    pub cpuct_factor: f32,
    pub cpuct_init: f32,
    pub cpuct_base_root: f32,
    pub cpuct_factor_root: f32,
    pub cpuct_init_root: f32,

    /// Exponent applied to the parent visit count inside the sqrt of the
    /// exploration term (1 => sqrt(N)).
    pub parent_term_exponent: f32,
    /// Exponent on the per-child denominator at the root; interior nodes
    /// always use 1.
    pub root_denominator_exponent: f32,

    /// First-play urgency: offset below the parent Q, plus a reduction
    /// scaled by sqrt of the already-visited policy mass.
    pub fpu_offset: f32,
    pub fpu_reduction: f32,

    /// Visit reservations gathered per selector per batch.
    pub batch_size: u32,
    /// Maximum child edges kept per node; evaluator priors beyond this are
    /// dropped lowest-first.
    pub policy_cap: usize,

    /// Moves-left bonus in the best-move chooser.
    pub mlh_bonus_factor: f32,
    /// |Q| above which the bonus engages.
    pub mlh_q_threshold: f32,
    /// Plies over which the bonus saturates.
    pub mlh_move_horizon: f32,
    /// Relative N window treated as a tie when ranking root children.
    pub n_tie_tolerance: f32,

    pub root_noise: Option<RootNoise>,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            cpuct_base: 2.15,
            cpuct_factor: 2.82,
            cpuct_init: 18368.0,
            cpuct_base_root: 2.15,
            cpuct_factor_root: 2.82,
            cpuct_init_root: 18368.0,
            parent_term_exponent: 1.0,
            root_denominator_exponent: 1.0,
            fpu_offset: 0.0,
            fpu_reduction: 0.44,
            batch_size: 32,
            policy_cap: 64,
            mlh_bonus_factor: 0.0,
            mlh_q_threshold: 0.8,
            mlh_move_horizon: 80.0,
            n_tie_tolerance: 0.02,
            root_noise: None,
        }
    }
}

impl SearchParams {
    pub fn from_config(cfg: &SearchSection) -> Self {
        let mut p = Self {
            cpuct_base: cfg.cpuct_base,
            cpuct_factor: cfg.cpuct_factor,
            cpuct_init: cfg.cpuct_init,
            cpuct_base_root: cfg.cpuct_base_root,
            cpuct_factor_root: cfg.cpuct_factor_root,
            cpuct_init_root: cfg.cpuct_init_root,
            fpu_offset: cfg.fpu_offset,
            fpu_reduction: cfg.fpu_reduction,
            batch_size: cfg.batch_size.max(1),
            mlh_bonus_factor: cfg.mlh_bonus_factor,
            ..Self::default()
        };
        if cfg.root_noise_epsilon > 0.0 {
            p.root_noise = Some(RootNoise {
                alpha: cfg.root_noise_alpha,
                epsilon: cfg.root_noise_epsilon,
                seed: 0,
            });
        }
        p
    }

    /// Exploration coefficient for a node with `parent_n` effective visits.
    pub fn cpuct(&self, parent_n: u32, at_root: bool) -> f32 {
        let (base, factor, init) = if at_root {
            (
                self.cpuct_base_root,
                self.cpuct_factor_root,
                self.cpuct_init_root,
            )
        } else {
            (self.cpuct_base, self.cpuct_factor, self.cpuct_init)
        };
        base + factor * ((parent_n as f32 + init + 1.0) / init).ln()
    }

    /// Estimated Q for a child that has never been visited.
    pub fn fpu_value(&self, parent_q: f32, sum_p_visited: f32) -> f32 {
        parent_q - self.fpu_offset - self.fpu_reduction * sum_p_visited.max(0.0).sqrt()
    }
}
