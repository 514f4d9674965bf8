//! Generate a report from a synthetic face video for validation testing

use rppg_flux::{SyntheticFaceVideo, VitalsProcessor};

fn main() {
    let mut video = SyntheticFaceVideo::new(30.0, 20.0, 75.0, 1);

    match VitalsProcessor::default().process_to_json(&mut video) {
        Ok(report) => print!("{report}"),
        Err(e) => eprintln!("Error: {e:?}"),
    }
}
