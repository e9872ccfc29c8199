use anchor_lang::prelude::*;

use crate::math::WAD;
use crate::state::CreditParams;

/// Maps time spent in Default to the fraction of debt written down (WAD).
/// Implementations must be non-decreasing in `elapsed` and never exceed `WAD`.
pub trait MarkdownModel {
    fn fraction(&self, elapsed: i64) -> u128;
}

/// Straight-line write-down reaching 1 after `full_duration` seconds.
#[derive(Clone, Copy, Debug)]
pub struct LinearMarkdown {
    pub full_duration: i64,
}

impl MarkdownModel for LinearMarkdown {
    fn fraction(&self, elapsed: i64) -> u128 {
        if elapsed <= 0 {
            return 0;
        }
        if self.full_duration <= 0 || elapsed >= self.full_duration {
            return WAD;
        }
        (elapsed as u128) * WAD / (self.full_duration as u128)
    }
}

/// Markets that opt out of markdowns.
#[derive(Clone, Copy, Debug)]
pub struct NoMarkdown;

impl MarkdownModel for NoMarkdown {
    fn fraction(&self, _elapsed: i64) -> u128 {
        0
    }
}

/// Per-market selection, stored on the market account.
#[derive(AnchorSerialize, AnchorDeserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MarkdownMode {
    #[default]
    Disabled,
    Linear,
}

/// Model resolved from a market's mode and the injected protocol params.
#[derive(Clone, Copy, Debug)]
pub enum ConfiguredMarkdown {
    Disabled(NoMarkdown),
    Linear(LinearMarkdown),
}

impl ConfiguredMarkdown {
    pub fn resolve(mode: MarkdownMode, params: &CreditParams) -> Self {
        match mode {
            MarkdownMode::Disabled => ConfiguredMarkdown::Disabled(NoMarkdown),
            MarkdownMode::Linear => ConfiguredMarkdown::Linear(LinearMarkdown {
                full_duration: params.full_markdown_duration,
            }),
        }
    }
}

impl MarkdownModel for ConfiguredMarkdown {
    fn fraction(&self, elapsed: i64) -> u128 {
        match self {
            ConfiguredMarkdown::Disabled(m) => m.fraction(elapsed),
            ConfiguredMarkdown::Linear(m) => m.fraction(elapsed),
        }
    }
}
