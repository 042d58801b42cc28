use rtrb::{Consumer, Producer, RingBuffer};

/// Lock-free SPSC sample queue (rtrb, real-time safe). The producer side
/// lives in a device callback or network flow; the consumer side in a
/// processing task or the output callback.
pub struct AudioRingBuffer {
    producer: Producer<i16>,
    consumer: Consumer<i16>,
}

impl AudioRingBuffer {
    pub fn new(capacity: usize) -> Self {
        let (producer, consumer) = RingBuffer::new(capacity);
        Self { producer, consumer }
    }

    pub fn split(self) -> (AudioProducer, AudioConsumer) {
        (
            AudioProducer {
                producer: self.producer,
            },
            AudioConsumer {
                consumer: self.consumer,
            },
        )
    }
}

/// Producer half. Writes are all-or-nothing and never block.
pub struct AudioProducer {
    producer: Producer<i16>,
}

impl AudioProducer {
    /// Write a whole slice, or nothing if it does not fit. The caller
    /// decides whether a refused write is worth a log line.
    pub fn write(&mut self, samples: &[i16]) -> Result<usize, ()> {
        let mut chunk = match self.producer.write_chunk(samples.len()) {
            Ok(chunk) => chunk,
            Err(_) => return Err(()),
        };

        // The reservation may wrap around the end of the buffer.
        let (first, second) = chunk.as_mut_slices();
        let split = first.len();
        first.copy_from_slice(&samples[..split]);
        if !second.is_empty() {
            second.copy_from_slice(&samples[split..]);
        }
        chunk.commit_all();
        Ok(samples.len())
    }

    /// Free slots remaining.
    pub fn slots(&self) -> usize {
        self.producer.slots()
    }
}

/// Consumer half. Reads whatever is available, never blocks.
pub struct AudioConsumer {
    consumer: Consumer<i16>,
}

impl AudioConsumer {
    /// Fill `buffer` from the queue; returns how many samples were read.
    pub fn read(&mut self, buffer: &mut [i16]) -> usize {
        let chunk = match self.consumer.read_chunk(buffer.len()) {
            Ok(chunk) => chunk,
            Err(rtrb::chunks::ChunkError::TooFewSlots(available)) => {
                if available == 0 {
                    return 0;
                }
                self.consumer.read_chunk(available).unwrap()
            }
        };

        let len = chunk.len();
        let (first, second) = chunk.as_slices();
        let split = first.len();
        buffer[..split].copy_from_slice(first);
        if !second.is_empty() {
            buffer[split..split + second.len()].copy_from_slice(second);
        }
        chunk.commit_all();
        len
    }

    /// Samples currently queued.
    pub fn slots(&self) -> usize {
        self.consumer.slots()
    }
}
