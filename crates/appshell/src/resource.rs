/// Number of global slots shared between the kernel and every VM it runs.
pub const GLOBALS_SIZE: usize = 1024;

/// Maximum operand stack depth of a single VM.
pub const STACK_SIZE: usize = 2048;

/// Maximum call depth of a single VM.
pub const MAX_FRAMES: usize = 1024;

/// Deepest container nesting that is printed or converted to JSON; deeper
/// levels print as `[...]`/`{...}` and fail JSON conversion. serde_json
/// refuses to parse documents nested 128 levels or more.
pub const MAX_NESTING: usize = 100;

/// Default bound on the length of any string a script can build.
pub const DEFAULT_MAX_STRING_LEN: usize = 2_147_483_647;

/// Default bound on the length of any byte string a script can build.
pub const DEFAULT_MAX_BYTES_LEN: usize = 2_147_483_647;

/// Default bound on the length of arrays built in one step by `range` and
/// `rand.perm`.
pub const DEFAULT_MAX_ARRAY_LEN: usize = 16_777_216;

/// Size limits shared by the VM, the builtins and the `fmt` module.
///
/// Every operation that grows a string or byte string checks the result
/// against these bounds, so a script cannot allocate unboundedly through
/// concatenation, formatting or printing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceLimits {
    pub max_string_len: usize,
    pub max_bytes_len: usize,
    pub max_array_len: usize,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_string_len: DEFAULT_MAX_STRING_LEN,
            max_bytes_len: DEFAULT_MAX_BYTES_LEN,
            max_array_len: DEFAULT_MAX_ARRAY_LEN,
        }
    }
}

impl ResourceLimits {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn max_string_len(mut self, len: usize) -> Self {
        self.max_string_len = len;
        self
    }

    #[must_use]
    pub fn max_bytes_len(mut self, len: usize) -> Self {
        self.max_bytes_len = len;
        self
    }

    #[must_use]
    pub fn max_array_len(mut self, len: usize) -> Self {
        self.max_array_len = len;
        self
    }
}
