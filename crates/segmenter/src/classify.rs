// Filename classification for worker output listings.

use std::sync::LazyLock;

use regex::Regex;

static INIT_SEGMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^init-stream(\d+)\.m4s$").unwrap());
static MEDIA_SEGMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^chunk-stream(\d+)-(\d+)\.m4s$").unwrap());

/// One entry of a `/beam/segments` listing, classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentFile {
    Manifest { name: String },
    Init { stream: u32, name: String },
    Media { stream: u32, number: u64, name: String },
    /// Anything else a worker leaves in its temp dir (logs, partials).
    Other { name: String },
}

pub fn classify(name: &str) -> SegmentFile {
    if name.ends_with(".mpd") || name.ends_with(".m3u8") {
        return SegmentFile::Manifest {
            name: name.to_owned(),
        };
    }
    if let Some(caps) = INIT_SEGMENT.captures(name) {
        if let Ok(stream) = caps[1].parse() {
            return SegmentFile::Init {
                stream,
                name: name.to_owned(),
            };
        }
    }
    if let Some(caps) = MEDIA_SEGMENT.captures(name) {
        if let (Ok(stream), Ok(number)) = (caps[1].parse(), caps[2].parse()) {
            return SegmentFile::Media {
                stream,
                number,
                name: name.to_owned(),
            };
        }
    }
    SegmentFile::Other {
        name: name.to_owned(),
    }
}

/// Order media segments for emission: by segment number first, stream id
/// second, so audio interleaves with video. Sorting by filename would list
/// every stream-0 segment before the first stream-1 segment and starve the
/// audio track during progressive download.
pub fn sort_media(media: &mut [(u32, u64, String)]) {
    media.sort_by_key(|(stream, number, _)| (*number, *stream));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert_eq!(
            classify("init-stream0.m4s"),
            SegmentFile::Init {
                stream: 0,
                name: "init-stream0.m4s".into()
            }
        );
        assert_eq!(
            classify("chunk-stream1-00042.m4s"),
            SegmentFile::Media {
                stream: 1,
                number: 42,
                name: "chunk-stream1-00042.m4s".into()
            }
        );
        assert_eq!(
            classify("output.mpd"),
            SegmentFile::Manifest {
                name: "output.mpd".into()
            }
        );
        assert_eq!(
            classify("master.m3u8"),
            SegmentFile::Manifest {
                name: "master.m3u8".into()
            }
        );
        assert_eq!(
            classify("input"),
            SegmentFile::Other {
                name: "input".into()
            }
        );
        assert_eq!(
            classify("chunk-stream0-00001.m4s.tmp"),
            SegmentFile::Other {
                name: "chunk-stream0-00001.m4s.tmp".into()
            }
        );
    }

    #[test]
    fn media_sort_interleaves_streams() {
        // filename order would put all of stream 0 first
        let mut media = vec![
            (0u32, 1u64, "chunk-stream0-00001.m4s".to_owned()),
            (0, 2, "chunk-stream0-00002.m4s".to_owned()),
            (0, 3, "chunk-stream0-00003.m4s".to_owned()),
            (1, 1, "chunk-stream1-00001.m4s".to_owned()),
            (1, 2, "chunk-stream1-00002.m4s".to_owned()),
        ];
        sort_media(&mut media);
        let order: Vec<(u32, u64)> = media.iter().map(|(s, n, _)| (*s, *n)).collect();
        assert_eq!(order, vec![(0, 1), (1, 1), (0, 2), (1, 2), (0, 3)]);
    }
}
