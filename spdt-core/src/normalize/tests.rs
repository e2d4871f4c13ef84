//! Tests for source normalization

#[cfg(test)]
mod normalize_tests {
    use crate::error::SpdtError;
    use crate::normalize::*;
    use crate::preprocess::{NoopPreprocessor, Preprocessor};
    use std::fs;

    /// Stands in for `g++ -E`: expands one object-like macro and emits a line marker.
    struct FakePreprocessor;

    impl Preprocessor for FakePreprocessor {
        fn expand(&self, source: &str) -> anyhow::Result<String> {
            let body = source
                .lines()
                .filter(|l| !l.starts_with("#define"))
                .map(|l| l.replace("LIMIT", "10"))
                .collect::<Vec<_>>()
                .join("\n");
            Ok(format!("# 1 \"<stdin>\"\n{}\n", body))
        }

        fn name(&self) -> &str {
            "fake"
        }
    }

    struct FailingPreprocessor;

    impl Preprocessor for FailingPreprocessor {
        fn expand(&self, _source: &str) -> anyhow::Result<String> {
            Err(SpdtError::ExternalTool {
                tool: "g++".to_string(),
                message: "not installed".to_string(),
            }
            .into())
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    fn normalizer(pp: Box<dyn Preprocessor>) -> Normalizer {
        Normalizer::new(NormalizeOptions::default(), pp)
    }

    #[test]
    fn test_strip_include_directives_keeps_other_directives() {
        let code = "#include <vector>\n  #include \"a.h\"\n#define X 1\nint x;";
        assert_eq!(strip_include_directives(code), "#define X 1\nint x;");
    }

    #[test]
    fn test_strip_preprocessor_directives_removes_all() {
        let code = "#pragma once\n#ifndef A\nint a;\n  #endif";
        assert_eq!(strip_preprocessor_directives(code), "int a;");
    }

    #[test]
    fn test_angle_includes_ignores_quoted() {
        let code = "#include <vector>\n#include \"local.h\"\n  #include <map>  \n";
        assert_eq!(angle_includes(code), vec!["#include <vector>", "#include <map>"]);
    }

    #[test]
    fn test_artifact_path() {
        assert_eq!(
            artifact_path(std::path::Path::new("sub/main.cpp")),
            std::path::PathBuf::from("sub/main_p.cpp")
        );
        assert_eq!(
            artifact_path(std::path::Path::new("noext")),
            std::path::PathBuf::from("noext_p")
        );
    }

    #[test]
    fn test_normalize_file_has_no_directives() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.cpp");
        fs::write(
            &path,
            "#include <iostream>\n#define LIMIT 10\nint main() { return LIMIT; }\n",
        )
        .unwrap();

        let unit = normalizer(Box::new(FakePreprocessor)).normalize_file(&path).unwrap();
        assert_eq!(unit.kind, UnitKind::File);
        assert!(unit.text.contains("return 10;"));
        assert!(unit.text.lines().all(|l| !l.trim_start().starts_with('#')));
        assert_eq!(unit.hash, content_hash(&unit.text));
    }

    #[test]
    fn test_normalize_file_writes_artifact_and_keeps_original() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.cpp");
        let original = "#include <cstdio>\nint main() { return 0; }\n";
        fs::write(&path, original).unwrap();

        let unit = normalizer(Box::new(NoopPreprocessor)).normalize_file(&path).unwrap();
        let artifact = dir.path().join("a_p.cpp");
        assert_eq!(fs::read_to_string(&artifact).unwrap(), unit.text);
        assert_eq!(fs::read_to_string(&path).unwrap(), original);
    }

    #[test]
    fn test_normalize_file_degrades_when_preprocessor_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.cpp");
        fs::write(&path, "#include <cstdio>\n#define N 3\nint a[N];\n").unwrap();

        let unit = normalizer(Box::new(FailingPreprocessor)).normalize_file(&path).unwrap();
        assert_eq!(unit.text, "int a[N];\n");
    }

    #[test]
    fn test_normalize_missing_file_is_missing_input() {
        let dir = tempfile::tempdir().unwrap();
        let err = normalizer(Box::new(NoopPreprocessor))
            .normalize_file(&dir.path().join("absent.cpp"))
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SpdtError>(),
            Some(SpdtError::MissingInput { .. })
        ));
    }

    fn write_project(dir: &std::path::Path) {
        fs::write(
            dir.join("shape.h"),
            "#pragma once\n#include <string>\nstruct Shape { int sides; };\n",
        )
        .unwrap();
        fs::write(
            dir.join("main.cpp"),
            "#include <vector>\n#include \"shape.h\"\n#define SIDES 4\nint main() { return SIDES; }\n",
        )
        .unwrap();
        fs::write(
            dir.join("util.cpp"),
            "#include <vector>\nint twice(int x) { return 2 * x; }\n",
        )
        .unwrap();
        fs::write(dir.join("notes.txt"), "not code").unwrap();
    }

    #[test]
    fn test_combine_directory_layout() {
        let dir = tempfile::tempdir().unwrap();
        write_project(dir.path());

        let unit = normalizer(Box::new(NoopPreprocessor))
            .combine_directory(dir.path())
            .unwrap();
        assert_eq!(unit.kind, UnitKind::Directory);

        let text = &unit.text;
        // Deduplicated system includes come first
        assert!(text.starts_with("#include <string>\n#include <vector>\n\n"));
        assert_eq!(text.matches("#include <vector>").count(), 1);
        assert!(!text.contains("\"shape.h\""));
        // Header bodies before source bodies, header directives gone
        let header = text.find("struct Shape").unwrap();
        let source = text.find("int main()").unwrap();
        assert!(header < source);
        assert!(!text.contains("#pragma once"));
        // Non-include directives in sources are retained
        assert!(text.contains("#define SIDES 4"));
        assert!(!text.contains("not code"));
    }

    #[test]
    fn test_combine_directory_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        write_project(dir.path());
        let n = normalizer(Box::new(NoopPreprocessor));

        let first = n.combine_directory(dir.path()).unwrap();
        let combined = dir.path().join("fin_ent.cpp");
        assert!(combined.is_file());

        // Later edits are not picked up: the combined file is reused
        fs::write(dir.path().join("extra.cpp"), "int extra() { return 1; }\n").unwrap();
        let second = n.combine_directory(dir.path()).unwrap();
        assert_eq!(first.text, second.text);
        assert_eq!(first.hash, second.hash);
    }

    #[test]
    fn test_combine_directory_refresh_recombines() {
        let dir = tempfile::tempdir().unwrap();
        write_project(dir.path());
        let first = normalizer(Box::new(NoopPreprocessor))
            .combine_directory(dir.path())
            .unwrap();

        fs::write(dir.path().join("extra.cpp"), "int extra() { return 1; }\n").unwrap();
        let options = NormalizeOptions {
            reuse_combined: false,
            ..Default::default()
        };
        let second = Normalizer::new(options, Box::new(NoopPreprocessor))
            .combine_directory(dir.path())
            .unwrap();
        assert_ne!(first.text, second.text);
        assert!(second.text.contains("int extra()"));
        // The previous combined file itself is never folded back in
        assert_eq!(second.text.matches("int twice").count(), 1);
    }

    #[test]
    fn test_combine_directory_uses_directory_name() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("student_42");
        fs::create_dir(&dir).unwrap();
        write_project(&dir);
        let unit = normalizer(Box::new(NoopPreprocessor))
            .combine_directory(&dir)
            .unwrap();
        assert_eq!(unit.id, "student_42");
    }

    #[test]
    fn test_combine_missing_directory() {
        let root = tempfile::tempdir().unwrap();
        let err = normalizer(Box::new(NoopPreprocessor))
            .combine_directory(&root.path().join("absent"))
            .unwrap_err();
        assert!(crate::error::missing_input(&err).is_some());
    }

    #[test]
    fn test_disambiguate_ids_prefixes_parent_on_clash() {
        let root = tempfile::tempdir().unwrap();
        let first = root.path().join("x").join("alice");
        let second = root.path().join("y").join("alice");
        let other = root.path().join("bob");
        for dir in [&first, &second, &other] {
            fs::create_dir_all(dir).unwrap();
        }
        let mut units = vec![
            SourceUnit::new("alice", first, UnitKind::Directory, "int a;".to_string()),
            SourceUnit::new("alice", second, UnitKind::Directory, "int b;".to_string()),
            SourceUnit::new("bob", other, UnitKind::Directory, "int c;".to_string()),
        ];
        disambiguate_ids(&mut units);
        let ids: Vec<&str> = units.iter().map(|u| u.id.as_str()).collect();
        assert_eq!(ids, vec!["x/alice", "y/alice", "bob"]);
    }

    #[test]
    fn test_disambiguate_ids_keeps_repeated_path() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("alice");
        fs::create_dir(&dir).unwrap();
        let mut units = vec![
            SourceUnit::new("alice", dir.clone(), UnitKind::Directory, "int a;".to_string()),
            SourceUnit::new("alice", dir, UnitKind::Directory, "int a;".to_string()),
        ];
        disambiguate_ids(&mut units);
        assert!(units.iter().all(|u| u.id == "alice"));
    }

    #[test]
    fn test_load_raw_is_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("raw.cpp");
        let code = "#include <cstdio>\nint main() { return 0; }\n";
        fs::write(&path, code).unwrap();
        let unit = normalizer(Box::new(NoopPreprocessor)).load_raw(&path).unwrap();
        assert_eq!(unit.kind, UnitKind::Raw);
        assert_eq!(unit.text, code);
    }
}
