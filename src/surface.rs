//! Spoofed API surfaces.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One JS-observable device surface the engine rewrites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Surface {
    Navigator,
    Screen,
    Timezone,
    Canvas,
    Webgl,
    Audio,
}

impl Surface {
    /// Every surface, in installation order.
    pub const ALL: [Surface; 6] = [
        Surface::Navigator,
        Surface::Screen,
        Surface::Timezone,
        Surface::Canvas,
        Surface::Webgl,
        Surface::Audio,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Surface::Navigator => "navigator",
            Surface::Screen => "screen",
            Surface::Timezone => "timezone",
            Surface::Canvas => "canvas",
            Surface::Webgl => "webgl",
            Surface::Audio => "audio",
        }
    }

    /// Surfaces whose outputs carry per-call jitter. The rest are static per profile.
    pub fn is_noise_bearing(&self) -> bool {
        matches!(self, Surface::Canvas | Surface::Audio)
    }
}

impl fmt::Display for Surface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
