use super::*;
use byteorder::{LittleEndian, ReadBytesExt};
use pack_writer::cipher::{COMMON_KEY_V2, v2_specific_key, xxtea_decrypt};
use serde_json::json;
use std::io::{Cursor, Read, Write};
use zip::ZipArchive;
use zip::write::SimpleFileOptions;

/// A transcoder that writes a recognizable 600-byte "MP3", long enough that
/// only its first 512 bytes get encrypted.
struct FakeTranscoder;

const FAKE_MP3_LEN: usize = 600;

fn fake_mp3() -> Vec<u8> {
    let mut bytes: Vec<u8> = (0..FAKE_MP3_LEN).map(|i| i as u8).collect();
    bytes[0] = 0xFF;
    bytes[1] = 0xFB;
    bytes
}

impl Transcoder for FakeTranscoder {
    fn transcode(&self, _input: &Path, output: &Path) -> Result<(), audio::TranscodeError> {
        std::fs::write(output, fake_mp3())?;
        Ok(())
    }
}

struct FailingTranscoder;

impl Transcoder for FailingTranscoder {
    fn transcode(&self, _input: &Path, _output: &Path) -> Result<(), audio::TranscodeError> {
        Err(audio::TranscodeError::TimedOut)
    }
}

fn black_png() -> Vec<u8> {
    let image = image::GrayImage::from_pixel(100, 100, image::Luma([0]));
    let mut buf = Cursor::new(Vec::new());
    image.write_to(&mut buf, image::ImageFormat::Png).unwrap();
    buf.into_inner()
}

fn studio_zip(dir: &Path, story: serde_json::Value, assets: &[(&str, &[u8])]) -> PathBuf {
    let path = dir.join("studio.zip");
    let mut writer = zip::ZipWriter::new(File::create(&path).unwrap());
    let options = SimpleFileOptions::default();
    writer.start_file("story.json", options).unwrap();
    writer
        .write_all(story.to_string().as_bytes())
        .unwrap();
    for (name, bytes) in assets {
        writer.start_file(*name, options).unwrap();
        writer.write_all(bytes).unwrap();
    }
    writer.finish().unwrap();
    path
}

fn read_entry(path: &Path, name: &str) -> Vec<u8> {
    let mut archive = ZipArchive::new(File::open(path).unwrap()).unwrap();
    let mut entry = archive.by_name(name).unwrap();
    let mut buf = Vec::new();
    entry.read_to_end(&mut buf).unwrap();
    buf
}

fn entry_names(path: &Path) -> Vec<String> {
    let archive = ZipArchive::new(File::open(path).unwrap()).unwrap();
    archive.file_names().map(str::to_owned).collect()
}

fn encode(input: &Path, transcoder: &dyn Transcoder) -> PathBuf {
    encode_pack_with(input, &EncodeOptions::default(), transcoder, |_, _| {})
        .expect("encoding fixture pack")
}

#[test]
fn single_story_pack() {
    let dir = tempfile::tempdir().unwrap();
    let story = json!({
        "stageNodes": [{
            "uuid": "aaaaaaaa-aaaa-aaaa-aaaa-aaaaaaaaaaaa",
            "kind": "entrypoint",
            "name": "T",
            "image": "c.png",
            "audio": "a.mp3",
        }],
        "actionNodes": [],
    });
    let input = studio_zip(
        dir.path(),
        story,
        &[("c.png", &black_png()), ("a.mp3", b"opaque source audio")],
    );
    let output = encode(&input, &FakeTranscoder);
    assert_eq!(output, dir.path().join("studio-native.zip"));

    let names = entry_names(&output);
    assert!(names.iter().all(|name| name.starts_with(".content/AAAAAAAA/")));
    assert!(names.contains(&".content/AAAAAAAA/rf/000/00000000".to_owned()));
    assert!(names.contains(&".content/AAAAAAAA/sf/000/00000000".to_owned()));

    let ni = read_entry(&output, ".content/AAAAAAAA/ni");
    assert_eq!(ni.len(), 556);
    let mut node = Cursor::new(&ni[512..]);
    assert_eq!(node.read_i32::<LittleEndian>().unwrap(), 0); // image 0
    assert_eq!(node.read_i32::<LittleEndian>().unwrap(), 0); // audio 0
    for _ in 0..6 {
        assert_eq!(node.read_i32::<LittleEndian>().unwrap(), -1); // no transitions
    }

    let ri = read_entry(&output, ".content/AAAAAAAA/ri");
    assert_eq!(xxtea_decrypt(&ri, &COMMON_KEY_V2), b"000\\00000000");
    let si = read_entry(&output, ".content/AAAAAAAA/si");
    assert_eq!(xxtea_decrypt(&si, &COMMON_KEY_V2), b"000\\00000000");

    // the image file decrypts back to a BMP
    let rf = read_entry(&output, ".content/AAAAAAAA/rf/000/00000000");
    let head = xxtea_decrypt(&rf[..512], &COMMON_KEY_V2);
    assert_eq!(&head[..2], b"BM");

    // only the first 512 bytes of the audio are touched
    let sf = read_entry(&output, ".content/AAAAAAAA/sf/000/00000000");
    let expected = fake_mp3();
    assert_eq!(sf.len(), expected.len());
    assert_eq!(&sf[512..], &expected[512..]);
    assert_eq!(xxtea_decrypt(&sf[..512], &COMMON_KEY_V2), &expected[..512]);
}

#[test]
fn two_option_menu() {
    let dir = tempfile::tempdir().unwrap();
    let story = json!({
        "stageNodes": [
            {"uuid": "aaaaaaaa-aaaa-aaaa-aaaa-aaaaaaaaaaaa", "kind": "entrypoint", "name": "menu",
             "okTransition": {"actionNode": "cccccccc-cccc-cccc-cccc-cccccccccccc", "optionIndex": 0}},
            {"uuid": "bbbbbbbb-bbbb-bbbb-bbbb-bbbbbbbbbbbb", "kind": "story", "name": "one"},
            {"uuid": "dddddddd-dddd-dddd-dddd-dddddddddddd", "kind": "story", "name": "two"},
        ],
        "actionNodes": [
            {"id": "cccccccc-cccc-cccc-cccc-cccccccccccc",
             "options": ["bbbbbbbb-bbbb-bbbb-bbbb-bbbbbbbbbbbb", "dddddddd-dddd-dddd-dddd-dddddddddddd"]},
        ],
    });
    let input = studio_zip(dir.path(), story, &[]);
    let output = encode(&input, &FakeTranscoder);

    let ni = read_entry(&output, ".content/AAAAAAAA/ni");
    let mut node = Cursor::new(&ni[512..]);
    node.read_i32::<LittleEndian>().unwrap(); // image
    node.read_i32::<LittleEndian>().unwrap(); // audio
    assert_eq!(node.read_i32::<LittleEndian>().unwrap(), 0); // ok position
    assert_eq!(node.read_i32::<LittleEndian>().unwrap(), 2); // ok count
    assert_eq!(node.read_i32::<LittleEndian>().unwrap(), 0); // ok index

    let li = read_entry(&output, ".content/AAAAAAAA/li");
    assert_eq!(li.len(), 8);
    let decrypted = xxtea_decrypt(&li, &COMMON_KEY_V2);
    let mut positions = Cursor::new(decrypted);
    assert_eq!(positions.read_u32::<LittleEndian>().unwrap(), 1);
    assert_eq!(positions.read_u32::<LittleEndian>().unwrap(), 2);
}

#[test]
fn missing_assets_abort_before_any_output() {
    let dir = tempfile::tempdir().unwrap();
    let story = json!({
        "stageNodes": [
            {"uuid": "aaaaaaaa-aaaa-aaaa-aaaa-aaaaaaaaaaaa", "kind": "entrypoint", "name": "a",
             "audio": "ghost.mp3"},
        ],
    });
    let input = studio_zip(dir.path(), story, &[]);
    let error = encode_pack_with(&input, &EncodeOptions::default(), &FakeTranscoder, |_, _| {})
        .unwrap_err();
    match error {
        EncodeError::MissingAssets { names, total } => {
            assert_eq!(names, vec!["ghost.mp3"]);
            assert_eq!(total, 1);
        }
        other => panic!("expected MissingAssets, got {other:?}"),
    }
    assert!(!dir.path().join("studio-native.zip").exists());
}

#[test]
fn missing_asset_report_caps_at_five_names() {
    let dir = tempfile::tempdir().unwrap();
    let stages: Vec<serde_json::Value> = (0..7)
        .map(|i| {
            json!({
                "uuid": format!("{i}{i}{i}{i}{i}{i}{i}{i}-0000-0000-0000-000000000000"),
                "kind": if i == 0 { "entrypoint" } else { "menu" },
                "name": format!("stage {i}"),
                "audio": format!("missing-{i}.mp3"),
            })
        })
        .collect();
    let input = studio_zip(dir.path(), json!({ "stageNodes": stages }), &[]);
    let error = encode_pack_with(&input, &EncodeOptions::default(), &FakeTranscoder, |_, _| {})
        .unwrap_err();
    match error {
        EncodeError::MissingAssets { names, total } => {
            assert_eq!(names.len(), 5);
            assert_eq!(total, 7);
            assert_eq!(names[0], "missing-0.mp3");
        }
        other => panic!("expected MissingAssets, got {other:?}"),
    }
}

#[test]
fn stage_without_audio_gets_the_blank_sentinel() {
    let dir = tempfile::tempdir().unwrap();
    let story = json!({
        "stageNodes": [
            {"uuid": "aaaaaaaa-aaaa-aaaa-aaaa-aaaaaaaaaaaa", "kind": "entrypoint", "name": "menu"},
        ],
    });
    let input = studio_zip(dir.path(), story, &[]);
    let output = encode(&input, &FakeTranscoder);

    // 108 bytes <= 512, so the whole file is one encrypted block
    let sf = read_entry(&output, ".content/AAAAAAAA/sf/000/00000000");
    assert_eq!(sf.len(), 108);
    assert_eq!(xxtea_decrypt(&sf, &COMMON_KEY_V2), &BLANK_MP3[..]);
}

#[test]
fn failed_transcodes_degrade_to_the_blank_sentinel() {
    let dir = tempfile::tempdir().unwrap();
    let story = json!({
        "stageNodes": [
            {"uuid": "aaaaaaaa-aaaa-aaaa-aaaa-aaaaaaaaaaaa", "kind": "entrypoint", "name": "a",
             "audio": "bad.mp3"},
        ],
    });
    let input = studio_zip(dir.path(), story, &[("bad.mp3", b"unconvertible")]);
    let output = encode(&input, &FailingTranscoder);
    let sf = read_entry(&output, ".content/AAAAAAAA/sf/000/00000000");
    assert_eq!(xxtea_decrypt(&sf, &COMMON_KEY_V2), &BLANK_MP3[..]);
}

#[test]
fn shared_audio_appears_once_per_stage() {
    let dir = tempfile::tempdir().unwrap();
    let story = json!({
        "stageNodes": [
            {"uuid": "aaaaaaaa-aaaa-aaaa-aaaa-aaaaaaaaaaaa", "kind": "entrypoint", "name": "a",
             "audio": "same.mp3"},
            {"uuid": "bbbbbbbb-bbbb-bbbb-bbbb-bbbbbbbbbbbb", "kind": "menu", "name": "b",
             "audio": "same.mp3"},
        ],
    });
    let input = studio_zip(dir.path(), story, &[("same.mp3", b"shared")]);
    let output = encode(&input, &FakeTranscoder);
    let first = read_entry(&output, ".content/AAAAAAAA/sf/000/00000000");
    let second = read_entry(&output, ".content/AAAAAAAA/sf/000/00000001");
    assert_eq!(first, second);

    // one slot per stage in si, one shared file would not do
    let si = read_entry(&output, ".content/AAAAAAAA/si");
    assert_eq!(xxtea_decrypt(&si, &COMMON_KEY_V2), b"000\\00000000000\\00000001");
}

#[test]
fn encoding_is_idempotent_on_native_packs() {
    let dir = tempfile::tempdir().unwrap();
    let story = json!({
        "stageNodes": [
            {"uuid": "aaaaaaaa-aaaa-aaaa-aaaa-aaaaaaaaaaaa", "kind": "entrypoint", "name": "a",
             "image": "c.png", "audio": "a.mp3"},
        ],
    });
    let input = studio_zip(
        dir.path(),
        story,
        &[("c.png", &black_png()), ("a.mp3", b"source audio")],
    );
    let native = encode(&input, &FakeTranscoder);
    let modified = std::fs::metadata(&native).unwrap().modified().unwrap();

    let again = encode(&native, &FakeTranscoder);
    assert_eq!(again, native);
    // nothing was rewritten
    assert_eq!(std::fs::metadata(&native).unwrap().modified().unwrap(), modified);

    // the short-circuit comes before the ffmpeg lookup, so the stock entry
    // point returns too, transcoder installed or not
    let again = encode_pack(&native, &EncodeOptions::default(), |_, _| {}).unwrap();
    assert_eq!(again, native);
}

#[test]
fn v2_boot_block_decrypts_to_the_encrypted_ri_head() {
    let dir = tempfile::tempdir().unwrap();
    let story = json!({
        "stageNodes": [
            {"uuid": "aaaaaaaa-aaaa-aaaa-aaaa-aaaaaaaaaaaa", "kind": "entrypoint", "name": "a",
             "image": "c.png"},
        ],
    });
    let input = studio_zip(dir.path(), story, &[("c.png", &black_png())]);
    let output = encode(&input, &FakeTranscoder);

    let ri = read_entry(&output, ".content/AAAAAAAA/ri");
    let bt = read_entry(&output, ".content/AAAAAAAA/bt");
    let uuid = uuid::uuid!("aaaaaaaa-aaaa-aaaa-aaaa-aaaaaaaaaaaa");
    let key = v2_specific_key(uuid.as_bytes());
    assert_eq!(xxtea_decrypt(&bt, &key), &ri[..64.min(ri.len())]);
}

#[test]
fn metadata_echoes_the_story() {
    let dir = tempfile::tempdir().unwrap();
    let story = json!({
        "title": "Night stories",
        "description": "Read slowly",
        "uuid": "12345678-1234-1234-1234-1234567890ab",
        "stageNodes": [
            {"uuid": "aaaaaaaa-aaaa-aaaa-aaaa-aaaaaaaaaaaa", "kind": "entrypoint", "name": "a"},
        ],
    });
    let input = studio_zip(dir.path(), story, &[]);
    let output = encode(&input, &FakeTranscoder);

    // the declared pack uuid wins over the entrypoint's
    let md = read_entry(&output, ".content/567890AB/md");
    assert_eq!(
        String::from_utf8(md).unwrap(),
        "title: Night stories\n\
         description: Read slowly\n\
         uuid: 12345678-1234-1234-1234-1234567890ab\n\
         ref: 567890AB\n\
         packType: custom\n"
    );
}

#[test]
fn v3_needs_key_material() {
    let dir = tempfile::tempdir().unwrap();
    let story = json!({
        "stageNodes": [
            {"uuid": "aaaaaaaa-aaaa-aaaa-aaaa-aaaaaaaaaaaa", "kind": "entrypoint", "name": "a"},
        ],
    });
    let input = studio_zip(dir.path(), story, &[]);
    let options = EncodeOptions {
        version: PackVersion::V3,
        ..Default::default()
    };
    let error =
        encode_pack_with(&input, &options, &FakeTranscoder, |_, _| {}).unwrap_err();
    assert!(matches!(error, EncodeError::MissingKeyMaterial));
}

#[test]
fn v3_writes_a_zero_boot_block() {
    let dir = tempfile::tempdir().unwrap();
    let story = json!({
        "stageNodes": [
            {"uuid": "aaaaaaaa-aaaa-aaaa-aaaa-aaaaaaaaaaaa", "kind": "entrypoint", "name": "a"},
        ],
    });
    let input = studio_zip(dir.path(), story, &[]);
    let options = EncodeOptions {
        version: PackVersion::V3,
        aes_key: Some(vec![0x42; 16]),
        aes_iv: Some(vec![0x17; 16]),
        ..Default::default()
    };
    let output =
        encode_pack_with(&input, &options, &FakeTranscoder, |_, _| {}).expect("V3 encode");
    let bt = read_entry(&output, ".content/AAAAAAAA/bt");
    assert_eq!(bt, vec![0u8; 64]);

    // AES pads the blank MP3 up to a whole block
    let sf = read_entry(&output, ".content/AAAAAAAA/sf/000/00000000");
    assert_eq!(sf.len(), 112);
}

#[test]
fn garbage_json_is_an_input_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("studio.zip");
    let mut writer = zip::ZipWriter::new(File::create(&path).unwrap());
    writer
        .start_file("story.json", SimpleFileOptions::default())
        .unwrap();
    writer.write_all(b"{ not json").unwrap();
    writer.finish().unwrap();

    let error = encode_pack_with(&path, &EncodeOptions::default(), &FakeTranscoder, |_, _| {})
        .unwrap_err();
    assert!(matches!(error, EncodeError::InvalidInput(_)));
}

#[test]
fn progress_runs_from_zero_to_done() {
    let dir = tempfile::tempdir().unwrap();
    let story = json!({
        "stageNodes": [
            {"uuid": "aaaaaaaa-aaaa-aaaa-aaaa-aaaaaaaaaaaa", "kind": "entrypoint", "name": "a"},
        ],
    });
    let input = studio_zip(dir.path(), story, &[]);
    let mut fractions = Vec::new();
    encode_pack_with(&input, &EncodeOptions::default(), &FakeTranscoder, |fraction, _| {
        fractions.push(fraction)
    })
    .unwrap();
    assert_eq!(fractions.first(), Some(&0.0));
    assert_eq!(fractions.last(), Some(&1.0));
    assert!(fractions.windows(2).all(|pair| pair[0] <= pair[1]));
}
