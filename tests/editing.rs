use pixelforge::canvas::{CanvasState, Color, PixelGrid, SelectionMask};
use pixelforge::components::history::HistoryManager;
use pixelforge::components::tools::{Modifiers, PointerEvent, Tool, ToolOutcome};
use pixelforge::ops::canvas_ops;
use pixelforge::ops::transform::{LayerTransform, TransformState, transform_layer};
use pixelforge::project::Project;
use pixelforge::settings::EditorSettings;

const RED: Color = Color::rgb(255, 0, 0);
const BLUE: Color = Color::rgb(0, 0, 255);

fn project(w: u32, h: u32) -> Project {
    let settings = EditorSettings {
        default_width: w,
        default_height: h,
        default_zoom: 10.0,
        primary_color: RED,
        ..Default::default()
    };
    Project::new_untitled(1, settings)
}

/// Centre of cell (cx, cy) at zoom 10.
fn at(cx: i32, cy: i32) -> (f32, f32) {
    (cx as f32 * 10.0 + 5.0, cy as f32 * 10.0 + 5.0)
}

fn stroke(p: &mut Project, cells: &[(i32, i32)], modifiers: Modifiers) {
    let (first, rest) = cells.split_first().unwrap();
    let (x, y) = at(first.0, first.1);
    p.handle_pointer(PointerEvent::down(x, y).with_modifiers(modifiers));
    let mut last = (x, y);
    for c in rest {
        last = at(c.0, c.1);
        p.handle_pointer(PointerEvent::moved(last.0, last.1).with_modifiers(modifiers));
    }
    p.handle_pointer(PointerEvent::up(last.0, last.1).with_modifiers(modifiers));
}

fn grid(p: &Project) -> &PixelGrid {
    p.canvas_state.active_grid().unwrap()
}

#[test]
fn undo_redo_walks_history_linearly() {
    let mut p = project(6, 6);
    let mut states = vec![grid(&p).clone()];
    for i in 0..4 {
        stroke(&mut p, &[(i, 0), (i, 3)], Modifiers::NONE);
        states.push(grid(&p).clone());
    }
    assert_eq!(p.history.undo_count(), 4);

    for expected in states.iter().rev().skip(1) {
        assert!(p.undo());
        assert_eq!(grid(&p), expected);
    }
    assert!(!p.undo());

    for expected in states.iter().skip(1) {
        assert!(p.redo());
        assert_eq!(grid(&p), expected);
    }
    assert!(!p.redo());

    // A new edit after undo drops the redo branch.
    p.undo();
    stroke(&mut p, &[(5, 5)], Modifiers::NONE);
    assert!(!p.history.can_redo());
}

#[test]
fn history_is_capped() {
    let mut state = CanvasState::new(4, 4);
    let mut history = HistoryManager::new(3);
    for _ in 0..10 {
        canvas_ops::add_frame(&mut state, &mut history);
    }
    assert_eq!(history.undo_count(), 3);
    while history.undo(&mut state).is_some() {}
    assert_eq!(state.frames.len(), 8);
}

#[test]
fn pencil_stroke_is_continuous_and_one_step() {
    let mut p = project(8, 8);
    stroke(&mut p, &[(0, 0), (7, 7)], Modifiers::NONE);
    for i in 0..8 {
        assert_eq!(grid(&p).get(i, i), Some(Some(RED)));
    }
    assert_eq!(p.history.undo_count(), 1);
}

#[test]
fn selection_limits_painting_and_fill() {
    let mut p = project(6, 6);
    p.set_tool(Tool::Select);
    stroke(&mut p, &[(1, 1), (2, 2)], Modifiers::NONE);
    assert_eq!(p.canvas_state.selection_mask.as_ref().unwrap().count(), 4);

    p.set_tool(Tool::Bucket);
    stroke(&mut p, &[(1, 1)], Modifiers::NONE);
    let painted = grid(&p).cells().iter().filter(|c| c.is_some()).count();
    assert_eq!(painted, 4);

    p.set_tool(Tool::Pencil);
    stroke(&mut p, &[(5, 5)], Modifiers::NONE);
    assert_eq!(grid(&p).get(5, 5), Some(None));
}

#[test]
fn selection_modifiers_combine_masks() {
    let mut p = project(8, 8);
    p.set_tool(Tool::Select);
    stroke(&mut p, &[(0, 0), (3, 3)], Modifiers::NONE);
    stroke(&mut p, &[(2, 2), (5, 5)], Modifiers { shift: true, alt: false });
    assert_eq!(p.canvas_state.selection_mask.as_ref().unwrap().count(), 16 + 16 - 4);

    stroke(&mut p, &[(0, 0), (1, 1)], Modifiers { shift: false, alt: true });
    assert_eq!(p.canvas_state.selection_mask.as_ref().unwrap().count(), 28 - 4);

    stroke(&mut p, &[(2, 2), (3, 3)], Modifiers { shift: true, alt: true });
    assert_eq!(p.canvas_state.selection_mask.as_ref().unwrap().count(), 4);
}

#[test]
fn move_tool_relocates_selected_pixels() {
    let mut p = project(8, 8);
    stroke(&mut p, &[(1, 1)], Modifiers::NONE);
    p.canvas_state.set_selection(Some(SelectionMask::full(8, 8)));
    p.set_tool(Tool::Move);
    stroke(&mut p, &[(1, 1), (4, 2)], Modifiers::NONE);
    assert_eq!(grid(&p).get(1, 1), Some(None));
    assert_eq!(grid(&p).get(4, 2), Some(Some(RED)));
    assert_eq!(p.history.undo_count(), 2);

    p.undo();
    assert_eq!(grid(&p).get(1, 1), Some(Some(RED)));
    assert_eq!(grid(&p).get(4, 2), Some(None));
}

#[test]
fn transform_commit_without_changes_is_identity() {
    let mut p = project(8, 8);
    stroke(&mut p, &[(2, 2), (4, 2)], Modifiers::NONE);
    p.canvas_state.active_grid_mut().unwrap().set(3, 3, Some(BLUE));
    let before = grid(&p).clone();

    p.set_tool(Tool::Transform);
    let (x, y) = at(3, 2);
    p.handle_pointer(PointerEvent::down(x, y));
    p.handle_pointer(PointerEvent::up(x, y));
    assert!(p.tools.transform_state().is_some());

    assert_eq!(p.set_tool(Tool::Pencil), ToolOutcome::TransformCommitted);
    assert_eq!(grid(&p), &before);
}

#[test]
fn transform_state_rasterizes_in_place_at_identity() {
    let mut g = PixelGrid::new(5, 5);
    g.set(1, 1, Some(RED));
    g.set(2, 3, Some(BLUE));
    let (t, cleared) = TransformState::lift(&g, None).unwrap();
    assert!(cleared.is_blank());
    assert_eq!(t.rasterize(&cleared), g);
    // No selection: the whole 2x3 content box is lifted.
    assert_eq!(t.rasterize_mask(5, 5).count(), 6);
}

#[test]
fn whole_layer_identity_transform_leaves_pixels() {
    let mut state = CanvasState::new(5, 5);
    let mut history = HistoryManager::default();
    state.active_grid_mut().unwrap().set(0, 4, Some(RED));
    let before = state.active_grid().unwrap().clone();
    let id = state.active_layer_id.clone();
    assert!(!transform_layer(&mut state, &mut history, &id, &LayerTransform::default()));
    assert_eq!(state.active_grid().unwrap(), &before);
    assert_eq!(history.undo_count(), 0);
}

#[test]
fn locked_layer_ignores_every_drawing_tool() {
    let mut p = project(4, 4);
    p.canvas_state.layers[0].locked = true;
    for tool in [Tool::Pencil, Tool::Eraser, Tool::Bucket] {
        p.set_tool(tool);
        stroke(&mut p, &[(0, 0), (3, 3)], Modifiers::NONE);
    }
    assert!(grid(&p).is_blank());
    assert_eq!(p.history.undo_count(), 0);
}
