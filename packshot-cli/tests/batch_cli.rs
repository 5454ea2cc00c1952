use std::error::Error;
use std::fs;
use std::path::Path;

use assert_cmd::cargo::cargo_bin_cmd;
use image::{ImageBuffer, Rgb};
use predicates::prelude::*;
use tempfile::tempdir;

const PROFILES: &str = r#"{
  "web": {
    "sizes": [{ "name": "main", "width": 80, "height": 60 }],
    "formats": ["jpg", "psd"]
  },
  "square": {
    "sizes": [{ "name": "thumb", "width": 32, "height": 32 }],
    "padColor": "white"
  }
}"#;

fn write_gradient(path: &Path, width: u32, height: u32) -> Result<(), Box<dyn Error>> {
    let img = ImageBuffer::from_fn(width, height, |x, y| {
        let r = ((x + y) % 255) as u8;
        Rgb([r, 128, 255u8.saturating_sub(r)])
    });
    img.save(path)?;
    Ok(())
}

#[test]
fn missing_model_falls_back_to_centre_square() -> Result<(), Box<dyn Error>> {
    let work = tempdir()?;
    let root = work.path();
    let input = root.join("input");
    let folder = input.join("set1");
    fs::create_dir_all(&folder)?;
    write_gradient(&input.join("sku.png"), 200, 100)?;
    write_gradient(&folder.join("a.png"), 40, 40)?;
    write_gradient(&folder.join("b.png"), 60, 30)?;
    fs::write(root.join("profiles.json"), PROFILES)?;

    let out = root.join("output");
    let mut cmd = cargo_bin_cmd!("packshot");
    cmd.current_dir(root)
        .env("RUST_LOG", "info")
        .arg("--cfg")
        .arg(root.join("profiles.json"))
        .arg("--input-dir")
        .arg(&input)
        .arg("--out-dir")
        .arg(&out)
        .arg("--model")
        .arg(root.join("missing.onnx"))
        .arg("--pad")
        .arg("10")
        .arg("--debug");
    cmd.assert()
        .success()
        .stderr(predicate::str::contains("using centre-square regions"));

    for file in [
        "web/sku_main_80x60.jpg",
        "web/sku_web.psd",
        "square/sku_thumb_32x32.jpg",
        "debug_sku.jpg",
        "web/set1_web_80x60.jpg",
        "web/set1_web.psd",
        "square/set1_square_32x32.jpg",
    ] {
        assert!(out.join(file).is_file(), "missing {file}");
    }

    let main = image::open(out.join("web/sku_main_80x60.jpg"))?;
    assert_eq!((main.width(), main.height()), (80, 60));
    let layout = image::open(out.join("web/set1_web_80x60.jpg"))?;
    assert_eq!((layout.width(), layout.height()), (80, 60));
    Ok(())
}

#[test]
fn missing_profiles_file_fails() -> Result<(), Box<dyn Error>> {
    let work = tempdir()?;
    let input = work.path().join("input");
    fs::create_dir_all(&input)?;
    write_gradient(&input.join("sku.png"), 20, 20)?;

    let mut cmd = cargo_bin_cmd!("packshot");
    cmd.current_dir(work.path())
        .arg("--cfg")
        .arg(work.path().join("absent.json"))
        .arg("--input-dir")
        .arg(&input);
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("absent.json"));
    Ok(())
}

#[test]
fn empty_input_directory_fails() -> Result<(), Box<dyn Error>> {
    let work = tempdir()?;
    let input = work.path().join("input");
    fs::create_dir_all(&input)?;
    fs::write(work.path().join("profiles.json"), PROFILES)?;

    let mut cmd = cargo_bin_cmd!("packshot");
    cmd.current_dir(work.path())
        .arg("--cfg")
        .arg(work.path().join("profiles.json"))
        .arg("--input-dir")
        .arg(&input);
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("nothing to process"));
    Ok(())
}

#[test]
fn failing_profile_does_not_skip_the_rest() -> Result<(), Box<dyn Error>> {
    let work = tempdir()?;
    let root = work.path();
    let input = root.join("input");
    let folder = input.join("set1");
    fs::create_dir_all(&folder)?;
    write_gradient(&input.join("sku.png"), 120, 90)?;
    write_gradient(&folder.join("a.png"), 40, 40)?;
    write_gradient(&folder.join("b.png"), 50, 30)?;
    fs::write(
        root.join("profiles.json"),
        r#"{
          "web": { "sizes": [{ "name": "main", "width": 80, "height": 60 }] },
          "square": {
            "sizes": [{ "name": "thumb", "width": 32, "height": 32 }],
            "exportPsd": true
          }
        }"#,
    )?;

    // A plain file where the "web" folder should go makes every web write fail.
    let out = root.join("output");
    fs::create_dir_all(&out)?;
    fs::write(out.join("web"), b"not a directory")?;

    let mut cmd = cargo_bin_cmd!("packshot");
    cmd.current_dir(root)
        .env("RUST_LOG", "info")
        .arg("--cfg")
        .arg(root.join("profiles.json"))
        .arg("--input-dir")
        .arg(&input)
        .arg("--out-dir")
        .arg(&out)
        .arg("--model")
        .arg(root.join("missing.onnx"));
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("set1/web"))
        .stderr(predicate::str::contains("2 item(s) failed"));

    for file in [
        "square/sku_thumb_32x32.jpg",
        "square/sku_square.psd",
        "square/set1_square_32x32.jpg",
        "square/set1_square.psd",
    ] {
        assert!(out.join(file).is_file(), "missing {file}");
    }
    Ok(())
}
