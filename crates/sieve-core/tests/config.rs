use sieve_core::config::{load_config, write_sample_config, SieveConfig};
use std::io::Write;
use tempfile::{NamedTempFile, TempDir};

#[test]
fn test_empty_document_uses_defaults() -> anyhow::Result<()> {
    let tmp = NamedTempFile::new()?;
    let cfg = load_config(tmp.path(), true)?;
    assert_eq!(cfg, SieveConfig::default());
    Ok(())
}

#[test]
fn test_unknown_keys_fail_only_in_strict_mode() -> anyhow::Result<()> {
    let mut tmp = NamedTempFile::new()?;
    writeln!(
        tmp,
        r#"
configVersion: 1
generation:
  oversampel: 1.6
x-notes: anything goes here
"#
    )?;

    let err = load_config(tmp.path(), true).unwrap_err();
    assert!(err.to_string().contains("generation.oversampel"), "{err}");
    assert!(!err.to_string().contains("x-notes"), "{err}");

    let cfg = load_config(tmp.path(), false)?;
    assert_eq!(cfg.generation.oversample, 1.75);
    Ok(())
}

#[test]
fn test_version_alias_and_unsupported_version() -> anyhow::Result<()> {
    let mut tmp = NamedTempFile::new()?;
    writeln!(tmp, "version: 2")?;
    let err = load_config(tmp.path(), true).unwrap_err();
    assert!(err.to_string().contains("unsupported config version 2"));
    Ok(())
}

#[test]
fn test_oversample_out_of_range_is_rejected() -> anyhow::Result<()> {
    let mut tmp = NamedTempFile::new()?;
    writeln!(tmp, "generation:\n  oversample: 2.5")?;
    let err = load_config(tmp.path(), true).unwrap_err();
    assert!(err.to_string().contains("oversample"));
    Ok(())
}

#[test]
fn test_bad_turn_pattern_is_rejected() -> anyhow::Result<()> {
    let mut tmp = NamedTempFile::new()?;
    writeln!(
        tmp,
        "cleaning:\n  turn_patterns:\n    - name: broken\n      pattern: \"(unclosed\""
    )?;
    assert!(load_config(tmp.path(), true).is_err());
    Ok(())
}

#[test]
fn test_few_shot_file_resolves_next_to_config() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    std::fs::write(
        dir.path().join("pool.txt"),
        "Write a limerick about a cat.\nList three uses for vinegar.\nExplain what a mortgage is.\nDescribe a sunrise in one sentence.\nGive two tips for better sleep.\n",
    )?;
    let path = dir.path().join("sieve.yaml");
    std::fs::write(&path, "prompts:\n  few_shot_pool: []\n  few_shot_file: pool.txt\n")?;

    let cfg = load_config(&path, true)?;
    let resolved = cfg.prompts.few_shot_file.clone().unwrap();
    assert_eq!(std::path::Path::new(&resolved), dir.path().join("pool.txt"));

    let pool = sieve_core::prompts::FewShotPool::from_settings(&cfg.prompts)?;
    assert_eq!(pool.examples().len(), 5);
    Ok(())
}

#[test]
fn test_sample_config_loads_strictly() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("sieve.yaml");
    write_sample_config(&path)?;
    let cfg = load_config(&path, true)?;
    assert_eq!(cfg.eval.bootstrap.as_ref().map(|b| b.seed), Some(7));
    assert_eq!(cfg.generation.response_sampling.max_new_tokens, 512);
    Ok(())
}
