//! Fresh symbol names for compiler-introduced bindings.

/// Generates sequential identifiers with a fixed prefix: `_cs_0`, `_cs_1`, ...
///
/// A generator is threaded explicitly through the passes that create
/// names, so two runs of the same pipeline produce the same names.
#[derive(Debug, Clone)]
pub struct UidGenerator {
    prefix: String,
    counter: usize,
}

impl UidGenerator {
    pub fn new(prefix: impl Into<String>) -> Self {
        UidGenerator {
            prefix: prefix.into(),
            counter: 0,
        }
    }

    /// Return the next identifier in the sequence.
    pub fn sequential_id(&mut self) -> String {
        let id = format!("{}_{}", self.prefix, self.counter);
        self.counter += 1;
        id
    }

    /// Return the next identifier that is not rejected by `taken`.
    pub fn fresh_id(&mut self, taken: impl Fn(&str) -> bool) -> String {
        loop {
            let id = self.sequential_id();
            if !taken(&id) {
                return id;
            }
        }
    }
}

impl Default for UidGenerator {
    fn default() -> Self {
        UidGenerator::new("_uid")
    }
}
