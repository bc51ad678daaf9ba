//! In-place PCM helpers.

/// Expand interleaved mono samples to stereo by duplicating each sample.
///
/// Works back to front so the buffer grows once and no scratch copy is needed.
pub(crate) fn mono_to_stereo(pcm: &mut Vec<u8>, bytes_per_sample: usize) {
    if bytes_per_sample == 0 {
        return;
    }
    let samples = pcm.len() / bytes_per_sample;
    pcm.truncate(samples * bytes_per_sample);
    pcm.resize(samples * bytes_per_sample * 2, 0);
    for i in (0..samples).rev() {
        let src = i * bytes_per_sample;
        let dst = i * bytes_per_sample * 2;
        pcm.copy_within(src..src + bytes_per_sample, dst + bytes_per_sample);
        pcm.copy_within(src..src + bytes_per_sample, dst);
    }
}
