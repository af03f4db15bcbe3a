//! Compiler diagnostics and their classification.
//!
//! The fragment compiler reports errors using a stable Roslyn-style code
//! vocabulary (`CS0101`, `CS0535`, ...). The classifier maps each code into
//! the closed [`DiagnosticCategory`] set, which drives auto-repair and the
//! contract-violation filter of the regeneration path.

use serde::{Deserialize, Serialize};

/// Closed classification set for compile errors.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticCategory {
    /// Duplicate type or member declaration.
    SymbolCollision,
    /// A class does not implement an interface member it declares.
    MissingInterfaceMember,
    /// A class does not override an inherited abstract member.
    MissingAbstractMember,
    /// A member's signature does not match the contract's.
    SignatureMismatch,
    /// Use of an enum member the contract does not declare.
    MissingEnumMember,
    /// A type inherits from a sealed abstract contract.
    IllegalInheritanceFromSealed,
    /// An unresolved symbol fixable by a using directive.
    MissingImport,
    /// A simple name that maps to more than one known type.
    AmbiguousReference,
    /// Anything the taxonomy does not cover.
    Other,
}

impl DiagnosticCategory {
    /// Whether the category has a deterministic tree rewrite. Undeclared
    /// enum members have none: choosing a replacement member is the
    /// model's call, so the diagnostic goes back to the oracle instead.
    pub fn auto_fixable(&self) -> bool {
        !matches!(
            self,
            DiagnosticCategory::MissingEnumMember | DiagnosticCategory::Other
        )
    }

    /// Categories stripped before re-prompting the oracle: these are
    /// resolved deterministically in the merge phase, so the model should
    /// not be asked to fix them.
    pub fn deferred_to_merge(&self) -> bool {
        matches!(
            self,
            DiagnosticCategory::MissingImport
                | DiagnosticCategory::AmbiguousReference
                | DiagnosticCategory::SymbolCollision
        )
    }
}

/// Stable diagnostic code vocabulary, mirroring the C# compiler codes the
/// host build driver emits.
pub mod codes {
    /// Duplicate type declaration in the same namespace.
    pub const DUPLICATE_TYPE: &str = "CS0101";
    /// Duplicate member declaration in the same type.
    pub const DUPLICATE_MEMBER: &str = "CS0111";
    /// Ambiguous reference between two namespaces.
    pub const AMBIGUOUS_REFERENCE: &str = "CS0104";
    /// Name does not exist in the current context / missing using.
    pub const TYPE_NOT_FOUND: &str = "CS0246";
    /// Member does not exist on type (undeclared enum member).
    pub const MEMBER_NOT_FOUND: &str = "CS0117";
    /// Cannot derive from sealed type.
    pub const SEALED_BASE: &str = "CS0509";
    /// Abstract inherited member not implemented.
    pub const ABSTRACT_NOT_IMPLEMENTED: &str = "CS0534";
    /// Interface member not implemented.
    pub const INTERFACE_NOT_IMPLEMENTED: &str = "CS0535";
    /// Member return type does not match the contract.
    pub const RETURN_TYPE_MISMATCH: &str = "CS0738";
}

/// Where a diagnostic was reported.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    /// 1-based line in the fragment.
    pub line: usize,
    /// Offending type name, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
}

/// A single classified compile error.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Stable error code (see [`codes`]).
    pub id: String,
    pub category: DiagnosticCategory,
    pub message: String,
    #[serde(default)]
    pub location: SourceLocation,
    /// Whether a deterministic rewrite exists for this diagnostic.
    pub auto_fixable: bool,
    /// Rewrite hint consumed by the repair pass (symbol name, namespace, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_fix: Option<String>,
}

impl Diagnostic {
    /// Build a diagnostic, deriving category and fixability from the code.
    pub fn from_code(id: &str, message: impl Into<String>, location: SourceLocation) -> Self {
        let category = classify(id);
        Self {
            id: id.to_string(),
            category,
            message: message.into(),
            location,
            auto_fixable: category.auto_fixable(),
            suggested_fix: None,
        }
    }

    /// Attach a rewrite hint.
    #[must_use]
    pub fn with_fix(mut self, fix: impl Into<String>) -> Self {
        self.suggested_fix = Some(fix.into());
        self
    }
}

/// Map a stable error code to its category. Unknown codes classify as
/// [`DiagnosticCategory::Other`].
pub fn classify(code: &str) -> DiagnosticCategory {
    match code {
        codes::DUPLICATE_TYPE | codes::DUPLICATE_MEMBER => DiagnosticCategory::SymbolCollision,
        codes::INTERFACE_NOT_IMPLEMENTED => DiagnosticCategory::MissingInterfaceMember,
        codes::ABSTRACT_NOT_IMPLEMENTED => DiagnosticCategory::MissingAbstractMember,
        codes::RETURN_TYPE_MISMATCH => DiagnosticCategory::SignatureMismatch,
        codes::MEMBER_NOT_FOUND => DiagnosticCategory::MissingEnumMember,
        codes::SEALED_BASE => DiagnosticCategory::IllegalInheritanceFromSealed,
        codes::TYPE_NOT_FOUND => DiagnosticCategory::MissingImport,
        codes::AMBIGUOUS_REFERENCE => DiagnosticCategory::AmbiguousReference,
        _ => DiagnosticCategory::Other,
    }
}

/// Strip the categories handled deterministically at merge time. Used when
/// preparing a repair prompt: if nothing remains the fragment is accepted.
pub fn filter_for_regeneration(diagnostics: &[Diagnostic]) -> Vec<Diagnostic> {
    diagnostics
        .iter()
        .filter(|d| !d.category.deferred_to_merge())
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_known_codes() {
        assert_eq!(classify("CS0101"), DiagnosticCategory::SymbolCollision);
        assert_eq!(classify("CS0111"), DiagnosticCategory::SymbolCollision);
        assert_eq!(classify("CS0535"), DiagnosticCategory::MissingInterfaceMember);
        assert_eq!(classify("CS0534"), DiagnosticCategory::MissingAbstractMember);
        assert_eq!(classify("CS0738"), DiagnosticCategory::SignatureMismatch);
        assert_eq!(classify("CS0117"), DiagnosticCategory::MissingEnumMember);
        assert_eq!(
            classify("CS0509"),
            DiagnosticCategory::IllegalInheritanceFromSealed
        );
        assert_eq!(classify("CS0246"), DiagnosticCategory::MissingImport);
        assert_eq!(classify("CS0104"), DiagnosticCategory::AmbiguousReference);
    }

    #[test]
    fn unknown_codes_are_other_and_not_fixable() {
        let d = Diagnostic::from_code("CS9999", "mystery", SourceLocation::default());
        assert_eq!(d.category, DiagnosticCategory::Other);
        assert!(!d.auto_fixable);
    }

    #[test]
    fn regeneration_filter_strips_merge_phase_categories() {
        let diags = vec![
            Diagnostic::from_code("CS0246", "missing using", SourceLocation::default()),
            Diagnostic::from_code("CS0104", "ambiguous", SourceLocation::default()),
            Diagnostic::from_code("CS0101", "duplicate", SourceLocation::default()),
            Diagnostic::from_code("CS0535", "unimplemented", SourceLocation::default()),
        ];
        let remaining = filter_for_regeneration(&diags);
        assert_eq!(remaining.len(), 1);
        assert_eq!(
            remaining[0].category,
            DiagnosticCategory::MissingInterfaceMember
        );
    }

    #[test]
    fn fix_hint_round_trips() {
        let d = Diagnostic::from_code("CS0246", "no Order", SourceLocation::default())
            .with_fix("Models");
        let json = serde_json::to_string(&d).expect("serialize");
        let back: Diagnostic = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back.suggested_fix.as_deref(), Some("Models"));
    }
}
