//! Diagnostic reporting and result codes.

use std::fmt;
use std::sync::Arc;

use log::{debug, warn};
use thiserror::Error;

/// Failure result of a parse. Success is `Ok` of the parsed value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
    #[error("invalid shader")]
    InvalidShader,
    #[error("out of memory")]
    OutOfMemory,
    #[error("not implemented")]
    NotImplemented,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("unspecified error")]
    Unspecified,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum DiagnosticCode {
    DxbcInvalidSize = 1,
    DxbcInvalidMagic = 2,
    DxbcInvalidVersion = 4,
    DxbcInvalidChunkOffset = 5,
    DxbcInvalidChunkSize = 6,
    DxbcMissingChunk = 8,

    DxilOutOfMemory = 8000,
    DxilInvalidSize = 8001,
    DxilInvalidChunkOffset = 8002,
    DxilInvalidChunkSize = 8003,
    DxilInvalidBitcode = 8004,
    DxilInvalidOperandCount = 8005,
    DxilInvalidTypeTable = 8006,
    DxilInvalidValueSymtab = 8007,
    DxilUnsupportedBitcodeFormat = 8008,
    DxilInvalidFunctionDcl = 8009,
    DxilInvalidTypeId = 8010,
    DxilInvalidModule = 8011,
    DxilInvalidOperand = 8012,
    DxilInvalidMetadata = 8014,
    DxilInvalidEntryPoint = 8015,
    DxilInvalidSignature = 8016,
    DxilInvalidProperties = 8017,
    DxilInvalidResources = 8018,
    DxilInvalidResourceHandle = 8019,
    DxilNotImplemented = 8020,

    DxilUnknownMagicNumber = 8300,
    DxilUnknownShaderType = 8301,
    DxilInvalidBlockLength = 8302,
    DxilInvalidModuleLength = 8303,
    DxilIgnoringOperands = 8304,
    DxilTypeMismatch = 8305,
    DxilEntryPointMismatch = 8306,
    DxilInvalidMask = 8307,
    DxilInvalidOperation = 8308,
    DxilUnhandledIntrinsic = 8309,
    DxilUnhandledMetadata = 8310,
}

impl DiagnosticCode {
    pub fn value(self) -> u32 {
        self as u32
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
    Note,
}

impl Severity {
    fn prefix(self) -> char {
        match self {
            Self::Error => 'E',
            Self::Warning => 'W',
            Self::Note => 'N',
        }
    }
}

/// Position a diagnostic or instruction refers to.
///
/// While bitcode is being decoded `line` is the id of the block being read and
/// `column` the index of the record within it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub source_name: Arc<str>,
    pub line: u32,
    pub column: u32,
}

impl Location {
    pub fn new(source_name: Arc<str>) -> Self {
        Self {
            source_name,
            line: 0,
            column: 0,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.source_name, self.line, self.column)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub location: Location,
    pub severity: Severity,
    pub code: DiagnosticCode,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {}{:04}: {}",
            self.location,
            self.severity.prefix(),
            self.code.value(),
            self.message
        )
    }
}

/// Accumulates diagnostics in emission order.
#[derive(Debug, Clone, Default)]
pub struct MessageContext {
    diagnostics: Vec<Diagnostic>,
}

impl MessageContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report(
        &mut self,
        location: &Location,
        severity: Severity,
        code: DiagnosticCode,
        message: impl Into<String>,
    ) {
        let diagnostic = Diagnostic {
            location: location.clone(),
            severity,
            code,
            message: message.into(),
        };
        match severity {
            Severity::Note => debug!("{diagnostic}"),
            Severity::Error | Severity::Warning => warn!("{diagnostic}"),
        }
        self.diagnostics.push(diagnostic);
    }

    pub fn error(&mut self, location: &Location, code: DiagnosticCode, message: impl Into<String>) {
        self.report(location, Severity::Error, code, message);
    }

    pub fn warning(&mut self, location: &Location, code: DiagnosticCode, message: impl Into<String>) {
        self.report(location, Severity::Warning, code, message);
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|diagnostic| diagnostic.severity == Severity::Error)
    }

    /// Whether any diagnostic with `code` was reported.
    pub fn contains(&self, code: DiagnosticCode) -> bool {
        self.diagnostics.iter().any(|diagnostic| diagnostic.code == code)
    }

    /// All diagnostics rendered one per line.
    pub fn messages(&self) -> String {
        let mut text = String::new();
        for diagnostic in &self.diagnostics {
            text.push_str(&diagnostic.to_string());
            text.push('\n');
        }
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_location_severity_and_code() {
        let mut context = MessageContext::new();
        let mut location = Location::new("shader.dxil".into());
        location.line = 17;
        location.column = 3;
        context.error(&location, DiagnosticCode::DxilInvalidTypeTable, "DXIL type table is invalid.");
        context.warning(&location, DiagnosticCode::DxilIgnoringOperands, "Ignoring 1 operand.");
        assert_eq!(
            context.messages(),
            "shader.dxil:17:3: E8006: DXIL type table is invalid.\n\
             shader.dxil:17:3: W8304: Ignoring 1 operand.\n"
        );
        assert!(context.has_errors());
    }
}
