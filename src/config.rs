/// Name used in diagnostics when the caller does not give one.
pub const DEFAULT_SOURCE_NAME: &str = "<anonymous>";

/// Encoding of [`CompileInfo::source`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourceType {
    /// A bare DXIL program chunk: the program header followed by bitcode.
    #[default]
    DxilChunk,
    /// A DXBC container holding a `DXIL` chunk.
    Dxbc,
}

/// Input description for a parse.
#[derive(Debug, Clone, Copy)]
pub struct CompileInfo<'a> {
    pub source: &'a [u8],
    pub source_name: Option<&'a str>,
    pub source_type: SourceType,
}

impl<'a> CompileInfo<'a> {
    pub fn new(source: &'a [u8], source_type: SourceType) -> Self {
        Self {
            source,
            source_name: None,
            source_type,
        }
    }

    #[must_use]
    pub fn with_source_name(mut self, name: &'a str) -> Self {
        self.source_name = Some(name);
        self
    }

    pub fn source_name(&self) -> &str {
        self.source_name.unwrap_or(DEFAULT_SOURCE_NAME)
    }
}
