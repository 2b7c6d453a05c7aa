/// Observer for a running import, so a CLI can draw progress.
pub trait ImportProgress {
    fn start(&mut self, total: usize);
    fn entry(&mut self, app_id: &str);
    fn finish(&mut self);
}

pub struct NoProgress;

impl ImportProgress for NoProgress {
    fn start(&mut self, _total: usize) {}
    fn entry(&mut self, _app_id: &str) {}
    fn finish(&mut self) {}
}
