//! Spec file loader: YAML -> immutable [`SpecNode`] tree.

use std::path::Path;

use crate::error::{Error, Result};
use crate::interpreter::Interpreter;
use crate::spec::SpecNode;

use super::schema::{Scalar, SpecFile, VenvSchema};

/// Load and validate a spec file. Any failure here is fatal at startup.
pub fn load_spec_file(path: &Path) -> Result<SpecNode> {
    let content = std::fs::read_to_string(path).map_err(|e| Error::ConfigLoad {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    let file: SpecFile = serde_yaml::from_str(&content).map_err(|e| Error::ConfigLoad {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    Ok(from_schema(file.venv))
}

fn from_schema(schema: VenvSchema) -> SpecNode {
    SpecNode {
        name: schema.name,
        command: schema.command,
        pys: schema
            .pys
            .map(|pys| {
                pys.into_vec()
                    .into_iter()
                    .map(|hint| Interpreter::new(hint.into_string()))
                    .collect()
            })
            .unwrap_or_default(),
        pkgs: schema
            .pkgs
            .map(|pkgs| {
                pkgs.into_iter()
                    .map(|(name, versions)| {
                        let versions = versions
                            .into_vec()
                            .into_iter()
                            .map(|v| v.map(Scalar::into_string))
                            .collect();
                        (name, versions)
                    })
                    .collect()
            })
            .unwrap_or_default(),
        env: schema
            .env
            .map(|env| {
                env.into_iter()
                    .map(|(name, values)| {
                        let values = values
                            .into_vec()
                            .into_iter()
                            .map(Scalar::into_string)
                            .collect();
                        (name, values)
                    })
                    .collect()
            })
            .unwrap_or_default(),
        venvs: schema
            .venvs
            .map(|venvs| venvs.into_iter().map(from_schema).collect())
            .unwrap_or_default(),
        create: schema.create,
        skip_dev_install: schema.skip_dev_install,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(yaml: &str) -> SpecNode {
        let file: SpecFile = serde_yaml::from_str(yaml).unwrap();
        from_schema(file.venv)
    }

    #[test]
    fn test_nested_tree() {
        let root = parse(
            r#"
venv:
  pys: ["3.9"]
  venvs:
    - name: mypy
      command: mypy
      pkgs:
        mypy: "==0.790"
    - name: test
      pys: ["3.7", "3.8", "3.9"]
      command: pytest
      pkgs:
        pytest: "==6.1.2"
"#,
        );
        assert_eq!(root.pys.len(), 1);
        assert_eq!(root.venvs.len(), 2);
        assert_eq!(root.venvs[0].name.as_deref(), Some("mypy"));
        assert_eq!(root.venvs[1].pys.len(), 3);
        assert_eq!(
            root.venvs[1].pkgs,
            vec![("pytest".to_string(), vec![Some("==6.1.2".to_string())])]
        );
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = load_spec_file(Path::new("/nonexistent/envmatrix.yml")).unwrap_err();
        assert!(matches!(err, Error::ConfigLoad { .. }));
    }

    #[test]
    fn test_malformed_yaml_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("envmatrix.yml");
        std::fs::write(&path, "venv: [not, a, mapping\n").unwrap();
        let err = load_spec_file(&path).unwrap_err();
        assert!(matches!(err, Error::ConfigLoad { .. }));
    }
}
