use super::{Deck, FCard};

/// Iterate the effective file list of a checkin.
///
/// For a baseline manifest this is just its F cards. For a delta manifest
/// the baseline's list is merged on demand: a delta card with the same
/// pathname wins, a delta card without a hash removes the file, and
/// untouched baseline cards pass through. Both lists are sorted by name,
/// so this is a plain merge join.
pub struct FileIter<'d> {
    delta: &'d [FCard],
    base: &'d [FCard],
    di: usize,
    bi: usize,
}

/// The effective files of `deck`, merged over `baseline` when `deck` is a
/// delta manifest. Passing `baseline: None` for a delta manifest iterates
/// the delta's own cards only.
pub fn files<'d>(deck: &'d Deck, baseline: Option<&'d Deck>) -> FileIter<'d> {
    FileIter {
        delta: &deck.f,
        base: baseline.map(|b| b.f.as_slice()).unwrap_or(&[]),
        di: 0,
        bi: 0,
    }
}

impl<'d> Iterator for FileIter<'d> {
    type Item = &'d FCard;

    fn next(&mut self) -> Option<&'d FCard> {
        loop {
            let dc = self.delta.get(self.di);
            let bc = self.base.get(self.bi);
            match (dc, bc) {
                (None, None) => return None,
                (Some(dc), None) => {
                    self.di += 1;
                    if dc.uuid.is_none() {
                        continue; // Deletion of a file the baseline lacks.
                    }
                    return Some(dc);
                }
                (None, Some(bc)) => {
                    self.bi += 1;
                    return Some(bc);
                }
                (Some(dc), Some(bc)) => match dc.name.cmp(&bc.name) {
                    std::cmp::Ordering::Less => {
                        self.di += 1;
                        if dc.uuid.is_none() {
                            continue;
                        }
                        return Some(dc);
                    }
                    std::cmp::Ordering::Greater => {
                        self.bi += 1;
                        return Some(bc);
                    }
                    std::cmp::Ordering::Equal => {
                        self.di += 1;
                        self.bi += 1;
                        if dc.uuid.is_none() {
                            continue; // Delta removes this baseline file.
                        }
                        return Some(dc);
                    }
                },
            }
        }
    }
}

/// Sorted-order F-card lookup with a one-step optimistic cursor: repeated
/// seeks in ascending name order cost O(1), anything else binary-searches.
pub struct FSeek<'d> {
    f: &'d [FCard],
    cursor: usize,
}

impl<'d> FSeek<'d> {
    pub fn new(deck: &'d Deck) -> FSeek<'d> {
        FSeek { f: &deck.f, cursor: 0 }
    }

    pub fn seek(&mut self, name: &str) -> Option<&'d FCard> {
        if let Some(fc) = self.f.get(self.cursor) {
            if fc.name == name {
                return Some(fc);
            }
        }
        if let Some(fc) = self.f.get(self.cursor + 1) {
            if fc.name == name {
                self.cursor += 1;
                return Some(fc);
            }
        }
        match self.f.binary_search_by(|fc| fc.name.as_str().cmp(name)) {
            Ok(i) => {
                self.cursor = i;
                Some(&self.f[i])
            }
            Err(_) => None,
        }
    }
}
