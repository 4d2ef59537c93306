/*
Copyright 2022 Volker Schwaberow <volker@schwaberow.de>
Permission is hereby granted, free of charge, to any person obtaining a
copy of this software and associated documentation files (the
"Software"), to deal in the Software without restriction, including without
limitation the rights to use, copy, modify, merge, publish, distribute,
sublicense, and/or sell copies of the Software, and to permit persons to whom the
Software is furnished to do so, subject to the following conditions:
The above copyright notice and this permission notice shall be
included in all copies or substantial portions of the Software.
THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS
OR IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF
MERCHANTABILITY, FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT
SHALL THE AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR
OTHER LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE,
ARISING FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
DEALINGS IN THE SOFTWARE.
Author(s): Volker Schwaberow
*/

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Run-wide counters shared by every fuzz task of a run.
#[derive(Debug)]
pub struct FuzzState {
    trials_sent: AtomicU64,
    normal: AtomicU64,
    anomalies: AtomicU64,
    exceptions: AtomicU64,
    start_time: Mutex<Option<DateTime<Utc>>>,
    end_time: Mutex<Option<DateTime<Utc>>>,
}

impl Default for FuzzState {
    fn default() -> Self {
        Self::new()
    }
}

impl FuzzState {
    pub fn new() -> FuzzState {
        FuzzState {
            trials_sent: AtomicU64::new(0),
            normal: AtomicU64::new(0),
            anomalies: AtomicU64::new(0),
            exceptions: AtomicU64::new(0),
            start_time: Mutex::new(None),
            end_time: Mutex::new(None),
        }
    }

    pub fn add_normal(&self) {
        self.trials_sent.fetch_add(1, Ordering::Relaxed);
        self.normal.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_anomaly(&self) {
        self.trials_sent.fetch_add(1, Ordering::Relaxed);
        self.anomalies.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_exception(&self) {
        self.trials_sent.fetch_add(1, Ordering::Relaxed);
        self.exceptions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn trials_sent(&self) -> u64 {
        self.trials_sent.load(Ordering::Relaxed)
    }

    pub fn normal(&self) -> u64 {
        self.normal.load(Ordering::Relaxed)
    }

    pub fn anomalies(&self) -> u64 {
        self.anomalies.load(Ordering::Relaxed)
    }

    pub fn exceptions(&self) -> u64 {
        self.exceptions.load(Ordering::Relaxed)
    }

    pub fn mark_start(&self) {
        if let Ok(mut start) = self.start_time.lock() {
            *start = Some(Utc::now());
        }
    }

    pub fn mark_end(&self) {
        if let Ok(mut end) = self.end_time.lock() {
            *end = Some(Utc::now());
        }
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.start_time.lock().ok().and_then(|t| *t)
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.end_time.lock().ok().and_then(|t| *t)
    }

    pub fn duration_ms(&self) -> u64 {
        match (self.start_time(), self.end_time()) {
            (Some(start), Some(end)) => (end - start).num_milliseconds().max(0) as u64,
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_counters_track_each_outcome() {
        let state = FuzzState::new();
        state.add_normal();
        state.add_anomaly();
        state.add_anomaly();
        state.add_exception();

        assert_eq!(state.trials_sent(), 4);
        assert_eq!(state.normal(), 1);
        assert_eq!(state.anomalies(), 2);
        assert_eq!(state.exceptions(), 1);
    }

    #[tokio::test]
    async fn test_counters_are_shared_across_tasks() {
        let state = Arc::new(FuzzState::new());
        let mut handles = Vec::new();
        for _ in 0..9 {
            let state = Arc::clone(&state);
            handles.push(tokio::spawn(async move {
                for _ in 0..10 {
                    state.add_exception();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(state.exceptions(), 90);
        assert_eq!(state.trials_sent(), 90);
    }

    #[test]
    fn test_duration_requires_both_marks() {
        let state = FuzzState::new();
        assert_eq!(state.duration_ms(), 0);
        state.mark_start();
        assert_eq!(state.duration_ms(), 0);
        state.mark_end();
        assert!(state.start_time().is_some());
        assert!(state.end_time().is_some());
    }
}
