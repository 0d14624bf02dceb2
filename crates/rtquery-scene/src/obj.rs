//! Wavefront OBJ loading.

use std::io::BufRead;
use std::path::Path;

use rtquery_core::SearchPaths;

use crate::error::{Result, SceneError};
use crate::Scene;

fn load_options() -> tobj::LoadOptions {
    tobj::LoadOptions {
        triangulate: true,
        single_index: false,
        ignore_points: true,
        ignore_lines: true,
        ..Default::default()
    }
}

/// Load a single-shape OBJ file from disk.
///
/// Only positions and position indices are kept; materials are ignored.
pub fn load_obj(path: impl AsRef<Path>) -> Result<Scene> {
    let path = path.as_ref();
    let (models, _materials) = tobj::load_obj(path, &load_options())?;
    let fallback = path
        .file_stem()
        .map_or_else(|| "scene".to_string(), |s| s.to_string_lossy().into_owned());
    scene_from_models(models, &fallback)
}

/// Parse a single-shape OBJ from an in-memory reader.
pub fn load_obj_reader(reader: &mut impl BufRead, name: &str) -> Result<Scene> {
    let (models, _materials) = tobj::load_obj_buf(reader, &load_options(), |_| {
        Err(tobj::LoadError::OpenFileFailed)
    })?;
    scene_from_models(models, name)
}

impl Scene {
    /// Locate `name` through the search paths and load it.
    pub fn find_and_load(paths: &SearchPaths, name: impl AsRef<Path>) -> Result<Self> {
        let path = paths.find(name)?;
        tracing::info!("Loading scene {}", path.display());
        let scene = load_obj(&path)?;
        let (min, max) = scene.bounds();
        tracing::info!(
            "Scene {}: {} vertices, {} triangles, bounds {min} .. {max}",
            scene.name(),
            scene.vertex_count(),
            scene.triangle_count(),
        );
        Ok(scene)
    }
}

fn scene_from_models(mut models: Vec<tobj::Model>, fallback_name: &str) -> Result<Scene> {
    if models.len() != 1 {
        return Err(SceneError::ShapeCount(models.len()));
    }
    let model = models.remove(0);
    let name = if model.name.is_empty() || model.name == "unnamed_object" {
        fallback_name.to_string()
    } else {
        model.name
    };
    Scene::from_parts(name, model.mesh.positions, model.mesh.indices)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufReader, Cursor, Write};

    const TRIANGLE: &str = "\
o tri
v 0 0 0
v 1 0 0
v 0 1 0
f 1 2 3
";

    fn parse(src: &str) -> Result<Scene> {
        load_obj_reader(&mut BufReader::new(Cursor::new(src)), "test")
    }

    #[test]
    fn single_triangle() {
        let scene = parse(TRIANGLE).unwrap();
        assert_eq!(scene.name(), "tri");
        assert_eq!(scene.vertex_count(), 3);
        assert_eq!(scene.triangle_count(), 1);
        assert_eq!(scene.indices(), &[0, 1, 2]);
        assert_eq!(scene.vertices()[3], 1.0);
    }

    #[test]
    fn quads_are_triangulated() {
        let scene = parse(
            "v 0 0 0\nv 1 0 0\nv 1 1 0\nv 0 1 0\nf 1 2 3 4\n",
        )
        .unwrap();
        assert_eq!(scene.triangle_count(), 2);
        assert!(scene.indices().iter().all(|&i| i < 4));
    }

    #[test]
    fn texture_and_normal_indices_are_dropped() {
        let scene = parse(
            "v 0 0 0\nv 1 0 0\nv 0 1 0\nvt 0 0\nvn 0 0 1\nf 1/1/1 2/1/1 3/1/1\n",
        )
        .unwrap();
        assert_eq!(scene.vertex_count(), 3);
        assert_eq!(scene.triangle_count(), 1);
    }

    #[test]
    fn two_shapes_are_rejected() {
        let src = format!("{TRIANGLE}o second\nv 0 0 1\nv 1 0 1\nv 0 1 1\nf 4 5 6\n");
        assert!(matches!(parse(&src), Err(SceneError::ShapeCount(2))));
    }

    #[test]
    fn no_faces_is_rejected() {
        assert!(parse("v 0 0 0\nv 1 0 0\nv 0 1 0\n").is_err());
    }

    #[test]
    fn load_from_file_uses_search_paths() {
        let dir = tempfile::tempdir().unwrap();
        let scenes = dir.path().join("scenes");
        std::fs::create_dir(&scenes).unwrap();
        let mut file = std::fs::File::create(scenes.join("box.obj")).unwrap();
        file.write_all(b"v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 3\n").unwrap();
        drop(file);

        let paths = SearchPaths::new().with_dir(dir.path());
        let scene = Scene::find_and_load(&paths, "scenes/box.obj").unwrap();
        assert_eq!(scene.name(), "box");
        assert_eq!(scene.triangle_count(), 1);
    }

    #[test]
    fn missing_file_reports_search_paths() {
        let dir = tempfile::tempdir().unwrap();
        let paths = SearchPaths::new().with_dir(dir.path());
        match Scene::find_and_load(&paths, "scenes/missing.obj") {
            Err(SceneError::Core(rtquery_core::Error::NotFound { name, searched })) => {
                assert_eq!(name, "scenes/missing.obj");
                assert_eq!(searched.len(), 1);
            }
            other => panic!("expected NotFound, got {other:?}"),
        }
    }
}
