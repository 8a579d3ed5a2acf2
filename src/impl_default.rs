use crate::compiler::Config;
use crate::Log;

impl Default for Config {
    fn default() -> Self {
        Self {
            captures: true,
            inlining: true,
            inline_threshold: 64,
        }
    }
}

impl<T> Default for Log<T> {
    fn default() -> Self {
        Log::None
    }
}
