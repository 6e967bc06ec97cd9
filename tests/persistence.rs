use pixelforge::canvas::{CanvasState, Color, LayerId, SelectionMask};
use pixelforge::components::history::HistoryManager;
use pixelforge::error::ProjectError;
use pixelforge::io::{self, ProjectDocument};
use pixelforge::ops::{canvas_ops, selection};

fn busy_state() -> CanvasState {
    let mut state = CanvasState::new(5, 4);
    let mut history = HistoryManager::default();
    canvas_ops::add_layer(&mut state, &mut history);
    state.active_grid_mut().unwrap().set(1, 2, Some(Color::rgb(0x29, 0xad, 0xff)));
    canvas_ops::duplicate_frame(&mut state, &mut history, 0);
    state.active_grid_mut().unwrap().set(4, 3, Some(Color::rgb(0xff, 0xec, 0x27)));
    canvas_ops::set_frame_delay(&mut state, &mut history, 1, 250);
    state.layers[0].opacity = 0.5;
    state.layers[0].locked = true;
    state.set_selection(Some(SelectionMask::full(5, 4)));
    selection::save_selection(&mut state, "everything");
    state.palettes.create("Mine", vec![Color::BLACK, Color::WHITE]);
    canvas_ops::set_fps(&mut state, 24);
    state
}

#[test]
fn json_and_binary_files_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let state = busy_state();
    for name in ["busy.json", "busy.pxf"] {
        let path = dir.path().join(name);
        io::save_project(&state, &path).unwrap();
        let loaded = io::load_project(&path).unwrap();
        assert_eq!(loaded.layers, state.layers);
        assert_eq!(loaded.frames, state.frames);
        assert_eq!(loaded.active_layer_id, state.active_layer_id);
        assert_eq!(loaded.saved_selections, state.saved_selections);
        assert_eq!(loaded.palettes, state.palettes);
        assert_eq!(loaded.fps, 24);
        assert_eq!(loaded.frames[1].delay, 250);
        // Session-only state is not persisted.
        assert_eq!(loaded.current_frame_index, 0);
        assert!(loaded.selection_mask.is_none());
    }
}

#[test]
fn binary_is_smaller_than_json() {
    let state = busy_state();
    let json = io::to_json(&state).unwrap();
    let bin = io::to_binary(&state).unwrap();
    assert!(bin.len() < json.len());
}

#[test]
fn malformed_files_leave_nothing_half_loaded() {
    let dir = tempfile::tempdir().unwrap();

    let truncated = dir.path().join("cut.json");
    let json = io::to_json(&busy_state()).unwrap();
    std::fs::write(&truncated, &json[..json.len() / 2]).unwrap();
    assert!(matches!(io::load_project(&truncated), Err(ProjectError::Json(_))));

    let garbage = dir.path().join("junk.pxf");
    std::fs::write(&garbage, b"\x04\0\0\0\0\0\0\0XXXX").unwrap();
    assert!(matches!(io::load_project(&garbage), Err(ProjectError::UnsupportedFormat(_))));

    let missing = dir.path().join("nope.json");
    assert!(matches!(io::load_project(&missing), Err(ProjectError::Io(_))));
}

#[test]
fn duplicate_layer_ids_are_rejected() {
    let mut doc = ProjectDocument::from_state(&busy_state());
    let first = doc.layers[0].clone();
    doc.layers[1].id = first.id.clone();
    assert!(matches!(doc.into_state(), Err(ProjectError::InvalidFormat(_))));
}

#[test]
fn grids_for_unknown_layers_are_dropped() {
    let mut doc = ProjectDocument::from_state(&busy_state());
    let grid = doc.frames[0].layers.values().next().unwrap().clone();
    doc.frames[0].layers.insert(LayerId::from("ghost"), grid);
    let state = doc.into_state().unwrap();
    assert!(state.frames[0].grid(&LayerId::from("ghost")).is_none());
    assert_eq!(state.frames[0].layers.len(), 2);
}

#[test]
fn opacity_is_clamped_and_zero_fps_defaulted() {
    let mut doc = ProjectDocument::from_state(&busy_state());
    doc.layers[0].opacity = 3.0;
    doc.fps = 0;
    let state = doc.into_state().unwrap();
    assert_eq!(state.layers[0].opacity, 1.0);
    assert_eq!(state.fps, pixelforge::canvas::DEFAULT_FPS);
}

#[test]
fn exports_composite_visible_layers() {
    let dir = tempfile::tempdir().unwrap();
    let mut state = busy_state();
    let top = state.active_layer_id.clone();
    let bottom = state.layers[0].id.clone();
    state.frames[0].grid_mut(&bottom).unwrap().set(0, 0, Some(Color::WHITE));
    state.layers[0].opacity = 1.0;

    let path = dir.path().join("f0.png");
    io::export_png_frame(&state, 0, 2, &path).unwrap();
    let img = image::open(&path).unwrap().into_rgba8();
    assert_eq!(img.dimensions(), (10, 8));
    assert_eq!(img.get_pixel(1, 1).0, [255, 255, 255, 255]);
    assert_eq!(img.get_pixel(2, 4).0, [0x29, 0xad, 0xff, 255]);

    state.layers.iter_mut().find(|l| l.id == top).unwrap().visible = false;
    io::export_png_frame(&state, 0, 1, &path).unwrap();
    let img = image::open(&path).unwrap().into_rgba8();
    assert_eq!(img.get_pixel(1, 2).0[3], 0);
}
