use crate::downloader::TrackMetadata;
use crate::messages;
use crate::quality::QualityReport;

/// Document caption: the track label (or a default), plus the measured
/// bitrate when the probe found nothing to warn about.
pub fn build_caption(metadata: Option<&TrackMetadata>, quality: Option<&QualityReport>) -> String {
    let mut caption = metadata
        .and_then(TrackMetadata::display_label)
        .unwrap_or_else(messages::caption_default);

    if let Some(report) = quality
        && report.warning.is_none()
    {
        caption.push('\n');
        caption.push_str(&messages::quality_line(&format!("~{} kbps", report.measured_kbps)));
    }
    caption
}
