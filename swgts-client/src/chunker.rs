//! Splitting a stream of pair groups into transmissions.

use swgts_core::{batch_bases, PairGroup};

use crate::error::Result;

fn group_bases(group: &PairGroup) -> u64 {
    group.iter().map(|read| read.bases() as u64).sum()
}

/// Groups pair groups into chunks of at most `max_bases` bases.
///
/// A chunk is emitted as soon as the next group would push it past the limit.
/// A group larger than the limit on its own travels alone; the server decides
/// what to do with it.
pub struct Chunker<I> {
    groups: I,
    max_bases: u64,
    carry: Option<PairGroup>,
    failed: bool,
}

impl<I> Chunker<I>
where
    I: Iterator<Item = Result<PairGroup>>,
{
    pub fn new(groups: I, max_bases: u64) -> Self {
        Self {
            groups,
            max_bases: max_bases.max(1),
            carry: None,
            failed: false,
        }
    }
}

impl<I> Iterator for Chunker<I>
where
    I: Iterator<Item = Result<PairGroup>>,
{
    type Item = Result<Vec<PairGroup>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        let mut chunk: Vec<PairGroup> = self.carry.take().into_iter().collect();
        let mut size = batch_bases(&chunk);

        for group in self.groups.by_ref() {
            let group = match group {
                Ok(group) => group,
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                }
            };

            let bases = group_bases(&group);
            if !chunk.is_empty() && size + bases > self.max_bases {
                self.carry = Some(group);
                return Some(Ok(chunk));
            }
            size += bases;
            chunk.push(group);
        }

        if chunk.is_empty() {
            None
        } else {
            Some(Ok(chunk))
        }
    }
}

/// Split a chunk in two halves by group count; `None` when it holds a single group
pub fn halve(mut chunk: Vec<PairGroup>) -> Option<(Vec<PairGroup>, Vec<PairGroup>)> {
    if chunk.len() < 2 {
        return None;
    }
    let back = chunk.split_off(chunk.len() / 2);
    Some((chunk, back))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClientError;
    use swgts_core::Read;

    fn group(bases: usize) -> PairGroup {
        vec![Read::new("@r", "A".repeat(bases), "+", "I".repeat(bases))]
    }

    fn sizes(chunks: Vec<Vec<PairGroup>>) -> Vec<u64> {
        chunks.iter().map(|c| batch_bases(c)).collect()
    }

    #[test]
    fn test_chunks_respect_limit() {
        let groups = [40, 40, 30, 50, 10].map(|n| Ok(group(n)));
        let chunks: Vec<_> = Chunker::new(groups.into_iter(), 100)
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(sizes(chunks), vec![80, 90]);
    }

    #[test]
    fn test_exact_fit_stays_together() {
        let groups = [50, 50, 1].map(|n| Ok(group(n)));
        let chunks: Vec<_> = Chunker::new(groups.into_iter(), 100)
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(sizes(chunks), vec![100, 1]);
    }

    #[test]
    fn test_oversize_group_travels_alone() {
        let groups = [10, 250, 10].map(|n| Ok(group(n)));
        let chunks: Vec<_> = Chunker::new(groups.into_iter(), 100)
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(sizes(chunks), vec![10, 250, 10]);
    }

    #[test]
    fn test_empty_input() {
        let groups: Vec<Result<PairGroup>> = vec![];
        assert!(Chunker::new(groups.into_iter(), 100).next().is_none());
    }

    #[test]
    fn test_error_stops_iteration() {
        let groups = vec![Ok(group(10)), Err(ClientError::TooManyRetries(0)), Ok(group(10))];
        let mut chunker = Chunker::new(groups.into_iter(), 100);
        assert!(chunker.next().unwrap().is_err());
        assert!(chunker.next().is_none());
    }

    #[test]
    fn test_halve() {
        let (front, back) = halve(vec![group(1), group(2), group(3)]).unwrap();
        assert_eq!(front.len(), 1);
        assert_eq!(back.len(), 2);
        assert!(halve(vec![group(1)]).is_none());
    }
}
