use super::speed::ConversionSpeed;

/// Fixed ffmpeg codec arguments per target extension.
pub fn ffmpeg_args(target: &str, speed: &ConversionSpeed) -> Vec<String> {
    let conversion_opts: &[&str] = match target {
        "mp4" | "mkv" | "mov" => &[
            "-c:v",
            "libx264",
            "-pix_fmt",
            "yuv420p",
            "-crf",
            "23",
            "-c:a",
            "aac",
            "-b:a",
            "160k",
        ],
        "webm" => &["-c:v", "libvpx", "-b:v", "1M", "-c:a", "libvorbis"],
        "avi" => &["-c:v", "mpeg4", "-q:v", "5", "-c:a", "libmp3lame"],
        "gif" => &["-vf", "fps=10,scale=480:-1:flags=lanczos", "-loop", "0", "-an"],

        "mp3" => &["-vn", "-c:a", "libmp3lame", "-q:a", "2"],
        "wav" => &["-vn", "-c:a", "pcm_s16le"],
        "ogg" => &["-vn", "-c:a", "libvorbis", "-q:a", "5"],
        "m4a" => &["-vn", "-c:a", "aac", "-b:a", "192k"],
        "aac" => &["-vn", "-c:a", "aac", "-b:a", "192k", "-f", "adts"],
        "flac" => &["-vn", "-c:a", "flac"],
        _ => &[],
    };

    let conversion_opts = conversion_opts
        .iter()
        .map(|s| s.to_string())
        .collect::<Vec<String>>();

    [conversion_opts, speed.to_args(target)].concat()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn video_targets_carry_speed_preset() {
        let args = ffmpeg_args("mp4", &ConversionSpeed::Fast);
        assert!(args.contains(&"libx264".to_string()));
        assert_eq!(&args[args.len() - 2..], ["-preset", "fast"]);
    }

    #[test]
    fn audio_targets_drop_video() {
        let args = ffmpeg_args("mp3", &ConversionSpeed::default());
        assert_eq!(args[0], "-vn");
        assert!(!args.contains(&"-preset".to_string()));
    }
}
