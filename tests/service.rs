use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use convertd::converter::error::ErrorKind;
use convertd::converter::input::FileDescriptor;
use convertd::converter::tool::Tool;
use convertd::converter::Dispatcher;
use convertd::job::{JobStatus, JobView};
use convertd::state::MemoryJobStore;
use convertd::sweeper::Sweeper;
use convertd::{Config, ConversionService, RetrieveError, SubmitError};
use image::{Rgb, RgbImage, Rgba, RgbaImage};
use strum::IntoEnumIterator;
use tokio::io::AsyncReadExt;
use uuid::Uuid;

/// Config rooted in a temp dir, with every external tool pointing nowhere so
/// results never depend on what the host has installed.
fn config(root: &Path) -> Config {
    let missing = root.join("no-such-tool");
    Tool::iter().fold(
        Config::default().with_storage_root(root.join("uploads")),
        |config, tool| config.with_tool(tool, &missing),
    )
}

async fn upload(service: &ConversionService, session: &str, name: &str, body: &[u8]) -> FileDescriptor {
    let dir = service.session_dir(session).unwrap();
    tokio::fs::create_dir_all(&dir).await.unwrap();
    let path = dir.join(format!("{}-{}", Uuid::new_v4().simple(), name));
    tokio::fs::write(&path, body).await.unwrap();
    FileDescriptor::from_upload(name, path).await.unwrap()
}

fn png(width: u32, height: u32) -> Vec<u8> {
    let img = RgbaImage::from_fn(width, height, |x, y| Rgba([x as u8, y as u8, 200, 255]));
    let mut bytes = std::io::Cursor::new(Vec::new());
    img.write_to(&mut bytes, image::ImageFormat::Png).unwrap();
    bytes.into_inner()
}

fn noisy_jpeg() -> Vec<u8> {
    let img = RgbImage::from_fn(96, 96, |_, _| Rgb([rand::random(), rand::random(), rand::random()]));
    let mut bytes = std::io::Cursor::new(Vec::new());
    img.write_to(&mut bytes, image::ImageFormat::Jpeg).unwrap();
    bytes.into_inner()
}

/// Polls until the job is terminal, checking progress on the way.
async fn wait(service: &ConversionService, id: Uuid) -> JobView {
    let mut last = 0;
    for _ in 0..400 {
        let view = service.get_job(&id.to_string()).await.expect("job exists");
        assert!(view.progress >= last, "progress went backwards");
        assert_eq!(view.progress == 100, view.status.is_terminal());
        assert_eq!(
            !view.converted_files.is_empty(),
            view.status == JobStatus::Completed
        );
        last = view.progress;
        if view.status.is_terminal() {
            return view;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("job {} did not finish", id);
}

async fn read_artifact(service: &ConversionService, id: Uuid, name: &str) -> Vec<u8> {
    let mut artifact = service
        .retrieve_artifact(&id.to_string(), name)
        .await
        .unwrap();
    let mut bytes = Vec::new();
    artifact.file.read_to_end(&mut bytes).await.unwrap();
    assert_eq!(bytes.len() as u64, artifact.size);
    bytes
}

fn targets(list: &[&str]) -> Vec<String> {
    list.iter().map(|t| t.to_string()).collect()
}

#[tokio::test]
async fn jpeg_becomes_a_single_pdf() {
    let root = tempfile::tempdir().unwrap();
    let service = ConversionService::new(config(root.path()));
    let file = upload(&service, "s1", "photo.jpg", &noisy_jpeg()).await;

    let id = service
        .submit_batch("s1", vec![file], &targets(&["pdf"]))
        .await
        .unwrap();
    let view = wait(&service, id).await;

    assert_eq!(view.status, JobStatus::Completed);
    assert_eq!(view.converted_files.len(), 1);
    assert_eq!(view.converted_files[0].converted_name, "photo.pdf");
    assert_eq!(
        view.download_url.as_deref(),
        Some(format!("/api/download/{}/photo.pdf", id).as_str())
    );

    let artifact = service
        .retrieve_artifact(&id.to_string(), "photo.pdf")
        .await
        .unwrap();
    assert_eq!(artifact.mime, "application/pdf");
    assert!(artifact.size > 0);
    assert!(read_artifact(&service, id, "photo.pdf")
        .await
        .starts_with(b"%PDF-"));
}

#[tokio::test]
async fn unsupported_pairs_fail_the_job() {
    let root = tempfile::tempdir().unwrap();
    let service = ConversionService::new(config(root.path()));
    let file = upload(&service, "s1", "blob.xyz", b"opaque").await;

    let id = service
        .submit_batch("s1", vec![file], &targets(&["docx"]))
        .await
        .unwrap();
    let view = wait(&service, id).await;

    assert_eq!(view.status, JobStatus::Failed);
    assert!(view.converted_files.is_empty());
    assert!(view.download_url.is_none());
    assert_eq!(view.failures.len(), 1);
    assert_eq!(view.failures[0].kind, ErrorKind::UnsupportedConversion);
}

#[tokio::test]
async fn many_outputs_are_packed() {
    let root = tempfile::tempdir().unwrap();
    let service = ConversionService::new(config(root.path()));
    let a = upload(&service, "s1", "a.png", &png(20, 10)).await;
    let b = upload(&service, "s1", "b.png", &png(8, 8)).await;

    let id = service
        .submit_batch("s1", vec![a, b], &targets(&["jpg", "BMP"]))
        .await
        .unwrap();
    let view = wait(&service, id).await;

    assert_eq!(view.status, JobStatus::Completed);
    let names: Vec<_> = view
        .converted_files
        .iter()
        .map(|f| f.converted_name.as_str())
        .collect();
    assert_eq!(names, vec!["a.jpg", "a.bmp", "b.jpg", "b.bmp"]);
    let archive_name = format!("converted-{}.zip", id);
    assert!(view.download_url.unwrap().ends_with(&archive_name));

    let bytes = read_artifact(&service, id, &archive_name).await;
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes)).unwrap();
    assert_eq!(archive.len(), 4);
    let mut first = Vec::new();
    archive.by_name("a.jpg").unwrap().read_to_end(&mut first).unwrap();
    assert_eq!(image::guess_format(&first).unwrap(), image::ImageFormat::Jpeg);

    // individual outputs stay downloadable
    assert!(!read_artifact(&service, id, "b.bmp").await.is_empty());
}

#[tokio::test]
async fn partial_failure_still_completes() {
    let root = tempfile::tempdir().unwrap();
    let service = ConversionService::new(config(root.path()));
    let good = upload(&service, "s1", "good.png", &png(4, 4)).await;
    let bad = upload(&service, "s1", "bad.png", b"not an image").await;

    let id = service
        .submit_batch("s1", vec![good, bad], &targets(&["jpg"]))
        .await
        .unwrap();
    let view = wait(&service, id).await;

    assert_eq!(view.status, JobStatus::Completed);
    assert_eq!(view.converted_files.len(), 1);
    assert_eq!(view.failures.len(), 1);
    assert_eq!(view.failures[0].original_name, "bad.png");
    assert_eq!(view.failures[0].kind, ErrorKind::ConversionFailed);
    assert!(view.download_url.unwrap().ends_with("/good.jpg"));
}

#[tokio::test]
async fn text_falls_back_to_builtin_pdf() {
    let root = tempfile::tempdir().unwrap();
    let service = ConversionService::new(config(root.path()));
    let file = upload(&service, "s1", "notes.txt", b"meeting notes\n\n- ship it\n").await;

    let id = service
        .submit_batch("s1", vec![file], &targets(&["pdf", "html"]))
        .await
        .unwrap();
    let view = wait(&service, id).await;

    assert_eq!(view.status, JobStatus::Completed);
    assert_eq!(view.converted_files.len(), 2);
    assert!(view.failures.is_empty());
    let html = read_artifact(&service, id, "notes.html").await;
    assert!(String::from_utf8(html).unwrap().contains("- ship it"));
}

#[tokio::test]
async fn data_round_trips_through_yaml() {
    let root = tempfile::tempdir().unwrap();
    let service = ConversionService::new(config(root.path()));
    let original = serde_json::json!({
        "name": "convertd",
        "retries": 3,
        "tags": ["a", "b"],
        "nested": { "enabled": true, "ratio": 0.25 }
    });
    let json = upload(&service, "s1", "settings.json", original.to_string().as_bytes()).await;

    let id = service
        .submit_batch("s1", vec![json], &targets(&["yaml"]))
        .await
        .unwrap();
    assert_eq!(wait(&service, id).await.status, JobStatus::Completed);
    let yaml = read_artifact(&service, id, "settings.yaml").await;

    let back = upload(&service, "s2", "settings.yaml", &yaml).await;
    let id = service
        .submit_batch("s2", vec![back], &targets(&["json"]))
        .await
        .unwrap();
    assert_eq!(wait(&service, id).await.status, JobStatus::Completed);
    let json = read_artifact(&service, id, "settings.json").await;

    let parsed: serde_json::Value = serde_json::from_slice(&json).unwrap();
    assert_eq!(parsed, original);
}

#[tokio::test]
async fn unknown_and_malformed_ids() {
    let root = tempfile::tempdir().unwrap();
    let service = ConversionService::new(config(root.path()));

    assert!(service.get_job(&Uuid::new_v4().to_string()).await.is_none());
    assert!(service.get_job("not-a-uuid").await.is_none());
    assert!(matches!(
        service
            .retrieve_artifact(&Uuid::new_v4().to_string(), "a.pdf")
            .await,
        Err(RetrieveError::NotFound)
    ));
}

#[tokio::test]
async fn retrieval_is_limited_to_job_outputs() {
    let root = tempfile::tempdir().unwrap();
    let service = ConversionService::new(config(root.path()));
    let file = upload(&service, "s1", "a.png", &png(4, 4)).await;
    let id = service
        .submit_batch("s1", vec![file], &targets(&["gif"]))
        .await
        .unwrap();
    wait(&service, id).await;

    let id = id.to_string();
    let archive = format!("converted-{}.zip", id);
    for name in ["a.png", "../a.gif", archive.as_str()] {
        assert!(matches!(
            service.retrieve_artifact(&id, name).await,
            Err(RetrieveError::NotFound)
        ));
    }
    assert!(service.retrieve_artifact(&id, "a.gif").await.is_ok());
}

#[tokio::test]
async fn submission_is_validated() {
    let root = tempfile::tempdir().unwrap();
    let service = ConversionService::new(config(root.path()));
    let file = upload(&service, "s1", "a.png", &png(2, 2)).await;

    assert_eq!(
        service
            .submit_batch("../s1", vec![file.clone()], &targets(&["jpg"]))
            .await,
        Err(SubmitError::InvalidSession("../s1".to_string()))
    );
    assert_eq!(
        service.submit_batch("s1", Vec::new(), &targets(&["jpg"])).await,
        Err(SubmitError::NoFiles)
    );
    assert_eq!(
        service.submit_batch("s1", vec![file], &targets(&[" "])).await,
        Err(SubmitError::NoTargets)
    );
}

#[tokio::test]
async fn session_cleanup_is_idempotent() {
    let root = tempfile::tempdir().unwrap();
    let service = ConversionService::new(config(root.path()));
    let file = upload(&service, "s1", "a.png", &png(4, 4)).await;
    let id = service
        .submit_batch("s1", vec![file], &targets(&["jpg"]))
        .await
        .unwrap();
    wait(&service, id).await;

    service.cleanup_session("s1").await.unwrap();
    service.cleanup_session("s1").await.unwrap();

    assert!(service.get_job(&id.to_string()).await.is_none());
    assert!(!service.session_dir("s1").unwrap().exists());
    assert!(service.cleanup_session("bad id").await.is_err());
}

#[tokio::test]
async fn expired_jobs_are_swept() {
    let root = tempfile::tempdir().unwrap();
    let config = config(root.path());
    let store = Arc::new(MemoryJobStore::new());
    let service =
        ConversionService::with_parts(config.clone(), store.clone(), Dispatcher::standard(&config));
    let file = upload(&service, "s1", "data.json", br#"{"a": 1}"#).await;
    let id = service
        .submit_batch("s1", vec![file], &targets(&["toml"]))
        .await
        .unwrap();
    assert_eq!(wait(&service, id).await.status, JobStatus::Completed);

    let sweeper = Sweeper::new(store, Arc::new(config));
    let report = sweeper.sweep_at(Utc::now() + TimeDelta::hours(25)).await;

    assert_eq!(report.jobs_removed, 1);
    assert!(service.get_job(&id.to_string()).await.is_none());
    assert!(!service.session_dir("s1").unwrap().exists());
}

#[tokio::test]
async fn sweeping_keeps_live_outputs_with_page_like_names() {
    let root = tempfile::tempdir().unwrap();
    let config = config(root.path());
    let store = Arc::new(MemoryJobStore::new());
    let service =
        ConversionService::with_parts(config.clone(), store.clone(), Dispatcher::standard(&config));
    let file = upload(&service, "s1", "v1.2.bmp", &png(6, 6)).await;
    let id = service
        .submit_batch("s1", vec![file], &targets(&["png"]))
        .await
        .unwrap();
    assert_eq!(wait(&service, id).await.status, JobStatus::Completed);

    let sweeper = Sweeper::new(store, Arc::new(config));
    sweeper.sweep_at(Utc::now() + TimeDelta::minutes(45)).await;

    assert!(!read_artifact(&service, id, "v1.2.png").await.is_empty());
}

#[tokio::test]
async fn packaging_failure_fails_the_batch() {
    let root = tempfile::tempdir().unwrap();
    let service = ConversionService::new(config(root.path()));

    // uploads live elsewhere and a plain file blocks the session directory,
    // so every conversion succeeds but the archive cannot be created
    let inbox = root.path().join("inbox");
    std::fs::create_dir_all(&inbox).unwrap();
    let stored = inbox.join("u1-a.png");
    std::fs::write(&stored, png(6, 6)).unwrap();
    let file = FileDescriptor::from_upload("a.png", &stored).await.unwrap();
    let session_dir = service.session_dir("s1").unwrap();
    std::fs::create_dir_all(session_dir.parent().unwrap()).unwrap();
    std::fs::write(&session_dir, b"in the way").unwrap();

    let id = service
        .submit_batch("s1", vec![file], &targets(&["jpg", "bmp"]))
        .await
        .unwrap();
    let view = wait(&service, id).await;

    assert_eq!(view.status, JobStatus::Failed);
    assert!(view.converted_files.is_empty());
    assert!(view.download_url.is_none());
    assert!(view
        .failures
        .iter()
        .any(|f| f.kind == ErrorKind::PackagingFailed));
    assert!(matches!(
        service.retrieve_artifact(&id.to_string(), "a.jpg").await,
        Err(RetrieveError::NotFound)
    ));
}

#[tokio::test]
async fn colliding_output_names_are_listed_once() {
    let root = tempfile::tempdir().unwrap();
    let service = ConversionService::new(config(root.path()));
    let first = upload(&service, "s1", "a.png", &png(4, 4)).await;
    let second = upload(&service, "s1", "a.bmp", &png(5, 5)).await;

    let id = service
        .submit_batch("s1", vec![first, second], &targets(&["pdf"]))
        .await
        .unwrap();
    let view = wait(&service, id).await;

    assert_eq!(view.status, JobStatus::Completed);
    assert_eq!(view.converted_files.len(), 1);
    assert_eq!(view.converted_files[0].original_name, "a.bmp");
    assert!(view.download_url.unwrap().ends_with("/a.pdf"));
}

#[test]
fn supported_targets_follow_the_table() {
    let service = ConversionService::new(Config::default());
    assert_eq!(
        service.supported_targets("JPEG"),
        vec!["png", "webp", "gif", "bmp", "tiff", "ico", "pdf", "zip"]
    );
    assert_eq!(service.supported_targets("weird"), vec!["zip"]);
}
