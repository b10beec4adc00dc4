use paintfe_projection::history::History;
use paintfe_projection::ops::region::RegionCombiner;
use paintfe_projection::settings::{Engine, ProjectionSettings};

fn temp_config(name: &str) -> std::path::PathBuf {
    std::env::temp_dir()
        .join(format!("paintfe-projection-test-{}", std::process::id()))
        .join(name)
}

#[test]
fn settings_file_round_trip() {
    let path = temp_config("round_trip.cfg");
    let settings = ProjectionSettings {
        engine: Engine::Graph,
        band_rows: 32,
        parallel_min_pixels: 1_000,
        max_undo_steps: 12,
        tile_size: 256,
    };
    settings.save_to(&path).unwrap();
    let loaded = ProjectionSettings::load_from(&path).unwrap();
    assert_eq!(loaded, settings);
    let _ = std::fs::remove_file(&path);
}

#[test]
fn missing_file_is_an_error_not_a_panic() {
    let path = temp_config("does_not_exist.cfg");
    assert!(ProjectionSettings::load_from(&path).is_err());
}

#[test]
fn hand_edited_file_with_comments() {
    let content = "# projection settings\n\
                   engine = graph\n\
                   \n\
                   max_undo_steps=abc\n\
                   parallel_min_pixels=42\n";
    let s = ProjectionSettings::parse(content);
    assert_eq!(s.engine, Engine::Graph);
    assert_eq!(s.max_undo_steps, ProjectionSettings::default().max_undo_steps);
    assert_eq!(s.parallel_min_pixels, 42);
}

#[test]
fn settings_drive_history_and_combiner() {
    let s = ProjectionSettings::parse("band_rows=8\nparallel_min_pixels=0\nmax_undo_steps=0\n");
    let combiner = RegionCombiner::from_settings(&s);
    assert_eq!(combiner.band_rows, 8);
    assert_eq!(combiner.parallel_min_pixels, 0);
    let history = History::from_settings(&s);
    assert!(!history.can_undo());
    assert_eq!(Engine::Graph.as_str(), "graph");
}
