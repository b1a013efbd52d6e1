//! Language detection from file extensions.

use std::path::Path;

/// How declaration spans are delimited in a language.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanStyle {
    /// Indentation-scoped bodies (Python).
    Indent,
    /// Brace-balanced bodies (C-family, Go, Rust, JS/TS, Java).
    Brace,
    /// Key/value configuration content; one chunk per file.
    Config,
}

/// Languages the chunker understands.
///
/// Unknown extensions yield zero chunks; the walker only visits files
/// whose extension maps to a supported language.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    /// Python source.
    Python,
    /// JavaScript source.
    JavaScript,
    /// TypeScript source.
    TypeScript,
    /// Java source.
    Java,
    /// Go source.
    Go,
    /// Rust source.
    Rust,
    /// C source and headers.
    C,
    /// C++ source and headers.
    Cpp,
    /// JSON configuration.
    Json,
    /// YAML configuration.
    Yaml,
    /// dotenv configuration.
    Env,
    /// Anything else; never chunked.
    Unknown,
}

impl Language {
    /// Detects a language from a file path's extension.
    #[must_use]
    pub fn from_path(path: &str) -> Self {
        let name = Path::new(path)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(path);
        if name == ".env" || name.starts_with(".env.") {
            return Self::Env;
        }
        let ext = Path::new(path)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("");
        Self::from_extension(ext)
    }

    /// Detects a language from a bare extension.
    #[must_use]
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_lowercase().as_str() {
            "py" | "pyw" | "pyi" => Self::Python,
            "js" | "mjs" | "cjs" | "jsx" => Self::JavaScript,
            "ts" | "tsx" => Self::TypeScript,
            "java" => Self::Java,
            "go" => Self::Go,
            "rs" => Self::Rust,
            "c" | "h" => Self::C,
            "cpp" | "cc" | "cxx" | "hpp" | "hxx" => Self::Cpp,
            "json" => Self::Json,
            "yaml" | "yml" => Self::Yaml,
            "env" => Self::Env,
            _ => Self::Unknown,
        }
    }

    /// Stable identifier stored on chunks.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::JavaScript => "javascript",
            Self::TypeScript => "typescript",
            Self::Java => "java",
            Self::Go => "go",
            Self::Rust => "rust",
            Self::C => "c",
            Self::Cpp => "cpp",
            Self::Json => "json",
            Self::Yaml => "yaml",
            Self::Env => "env",
            Self::Unknown => "unknown",
        }
    }

    /// How this language's declaration spans are delimited.
    #[must_use]
    pub const fn span_style(self) -> Option<SpanStyle> {
        match self {
            Self::Python => Some(SpanStyle::Indent),
            Self::JavaScript
            | Self::TypeScript
            | Self::Java
            | Self::Go
            | Self::Rust
            | Self::C
            | Self::Cpp => Some(SpanStyle::Brace),
            Self::Json | Self::Yaml | Self::Env => Some(SpanStyle::Config),
            Self::Unknown => None,
        }
    }

    /// Whether the walker should visit files of this language.
    #[must_use]
    pub const fn is_supported(self) -> bool {
        !matches!(self, Self::Unknown)
    }

    /// File extensions visited by the repository walker.
    #[must_use]
    pub const fn supported_extensions() -> &'static [&'static str] {
        &[
            "py", "pyw", "pyi", "js", "mjs", "cjs", "jsx", "ts", "tsx", "java", "go", "rs", "c",
            "h", "cpp", "cc", "cxx", "hpp", "hxx", "json", "yaml", "yml", "env",
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("src/main.py", Language::Python)]
    #[test_case("lib/app.ts", Language::TypeScript)]
    #[test_case("pkg/server.go", Language::Go)]
    #[test_case("src/lib.rs", Language::Rust)]
    #[test_case("native/impl.cpp", Language::Cpp)]
    #[test_case("config/app.yaml", Language::Yaml)]
    #[test_case("settings.json", Language::Json)]
    #[test_case(".env", Language::Env)]
    #[test_case(".env.production", Language::Env)]
    #[test_case("README.md", Language::Unknown)]
    #[test_case("Makefile", Language::Unknown)]
    fn test_from_path(path: &str, expected: Language) {
        assert_eq!(Language::from_path(path), expected);
    }

    #[test]
    fn test_span_styles() {
        assert_eq!(Language::Python.span_style(), Some(SpanStyle::Indent));
        assert_eq!(Language::Go.span_style(), Some(SpanStyle::Brace));
        assert_eq!(Language::Json.span_style(), Some(SpanStyle::Config));
        assert_eq!(Language::Unknown.span_style(), None);
    }

    #[test]
    fn test_supported_extensions_map_back() {
        for ext in Language::supported_extensions() {
            assert!(
                Language::from_extension(ext).is_supported(),
                "extension {ext} should map to a supported language"
            );
        }
    }

    #[test]
    fn test_case_insensitive_extension() {
        assert_eq!(Language::from_extension("PY"), Language::Python);
        assert_eq!(Language::from_extension("Rs"), Language::Rust);
    }
}
