use std::fs;

use camino::Utf8PathBuf;

use dataset_harvester::config::default_reset_keep;
use dataset_harvester::domain::{DatasetId, PartNaming};
use dataset_harvester::store::Store;

fn populated_store(temp: &tempfile::TempDir) -> Store {
    let root = Utf8PathBuf::from_path_buf(temp.path().join("downloads")).unwrap();
    fs::create_dir_all(root.join("DS1/csv").as_std_path()).unwrap();
    fs::write(root.join("DS1/csv/DS1_dataSet_part_1.csv").as_std_path(), "a\n1\n").unwrap();
    fs::write(root.join("DS2_dataSet.csv").as_std_path(), "a\n").unwrap();
    fs::write(root.join(".gitignore").as_std_path(), "*\n").unwrap();
    Store::new(root)
}

#[test]
fn layout_paths() {
    let store = Store::new("out");
    let id: DatasetId = "BfMAe6Itzgt".parse().unwrap();
    assert!(store.raw_path(&id).ends_with("BfMAe6Itzgt_dataSet.csv"));

    let naming = PartNaming::from_file_stem("BfMAe6Itzgt_dataSet");
    assert_eq!(store.dataset_dir(&naming), "out/BfMAe6Itzgt");
    assert_eq!(store.csv_dir(&naming), "out/BfMAe6Itzgt/csv");
    assert!(store.json_path(&naming).ends_with("json/BfMAe6Itzgt_dataSet.json"));
}

#[test]
fn reset_removes_everything_but_kept_names() {
    let temp = tempfile::tempdir().unwrap();
    let store = populated_store(&temp);

    let report = store.reset(&default_reset_keep()).unwrap();

    assert_eq!(report.removed.len(), 2);
    assert_eq!(report.kept.len(), 1);
    assert!(report.failed.is_empty());
    let remaining: Vec<String> = fs::read_dir(store.output_root().as_std_path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(remaining, vec![".gitignore".to_string()]);
}

#[test]
fn reset_without_keep_list_empties_root() {
    let temp = tempfile::tempdir().unwrap();
    let store = populated_store(&temp);

    store.reset(&[]).unwrap();

    assert!(store.output_root().as_std_path().is_dir());
    assert_eq!(
        fs::read_dir(store.output_root().as_std_path()).unwrap().count(),
        0
    );
}

#[test]
fn reset_is_idempotent() {
    let temp = tempfile::tempdir().unwrap();
    let store = populated_store(&temp);

    store.reset(&default_reset_keep()).unwrap();
    let second = store.reset(&default_reset_keep()).unwrap();

    assert!(second.removed.is_empty());
    assert_eq!(second.kept.len(), 1);
}

#[test]
fn atomic_write_creates_parent_and_leaves_no_temp_files() {
    let temp = tempfile::tempdir().unwrap();
    let target = Utf8PathBuf::from_path_buf(temp.path().join("nested/dir/out.json")).unwrap();

    Store::write_bytes_atomic(&target, b"{}").unwrap();

    assert_eq!(fs::read_to_string(target.as_std_path()).unwrap(), "{}");
    let names: Vec<String> = fs::read_dir(temp.path().join("nested/dir"))
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["out.json".to_string()]);
}

#[test]
fn reset_report_lists_are_sorted() {
    let temp = tempfile::tempdir().unwrap();
    let store = populated_store(&temp);
    for name in ["zeta", "README", "alpha"] {
        fs::write(store.output_root().join(name).as_std_path(), "").unwrap();
    }
    let keep = vec![
        "zeta".to_string(),
        ".gitignore".to_string(),
        "alpha".to_string(),
        "README".to_string(),
    ];

    let report = store.reset(&keep).unwrap();

    let mut kept = report.kept.clone();
    kept.sort();
    assert_eq!(report.kept, kept);
    assert_eq!(report.kept.len(), 4);
    let mut removed = report.removed.clone();
    removed.sort();
    assert_eq!(report.removed, removed);
}
