#![cfg(feature = "integration-test-api")]

mod support;

use std::fs;

use serde_json::json;
use serial_test::serial;
use support::{IntegrationEnv, options};
use vidthumb_core::ffmpeg::{FfmpegCodec, active_ffmpeg_count, verify_media};
use vidthumb_core::{OutputFormat, ThumbnailGenerator};

#[test]
#[serial]
fn gif_from_auto_sections_decodes_cleanly() {
    let env = IntegrationEnv::new();
    let input = env.with_test_video("input.mp4", 6.0, false);
    let opts = options(
        &env.path("cache"),
        json!({ "autoSections": 2, "sectionDuration": 1, "framesPerSection": 5, "width": 160, "gifColors": 64 }),
    );

    let result = ThumbnailGenerator::new(FfmpegCodec::new())
        .generate(&input, &opts)
        .unwrap();
    assert_eq!(result.metadata.format, OutputFormat::Gif);
    assert_eq!((result.metadata.width, result.metadata.height), (160, 120));
    assert_eq!(result.metadata.total_frames, 10);
    assert_eq!(&fs::read(&result.path).unwrap()[..6], b"GIF89a");
    verify_media(&result.path).unwrap();
    assert_eq!(active_ffmpeg_count(), 0);
}

#[test]
#[serial]
fn mp4_with_audio_decodes_cleanly() {
    let env = IntegrationEnv::new();
    let input = env.with_test_video("input.mp4", 6.0, true);
    let opts = options(
        &env.path("cache"),
        json!({ "format": "mp4", "includeAudio": true, "autoSections": 2, "sectionDuration": 1, "width": 161 }),
    );

    let result = ThumbnailGenerator::new(FfmpegCodec::new())
        .generate(&input, &opts)
        .unwrap();
    assert_eq!(result.metadata.has_audio, Some(true));
    assert_eq!(result.metadata.width % 2, 0);
    verify_media(&result.path).unwrap();
}

#[test]
#[serial]
fn rebuilding_the_same_request_is_byte_identical() {
    let env = IntegrationEnv::new();
    let input = env.with_test_video("input.mp4", 4.0, false);
    let generator = ThumbnailGenerator::new(FfmpegCodec::new());

    let first = generator
        .generate(&input, &options(&env.path("cache-a"), json!({ "width": 96 })))
        .unwrap();
    let second = generator
        .generate(&input, &options(&env.path("cache-b"), json!({ "width": 96 })))
        .unwrap();
    assert!(!second.cached);
    assert_eq!(fs::read(&first.path).unwrap(), fs::read(&second.path).unwrap());
}
