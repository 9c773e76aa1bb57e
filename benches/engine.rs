use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use escrow_eng::Amount;
use escrow_eng::engine::{Command, Engine};
use escrow_eng::identity::Directory;
use escrow_eng::model::{
    Actor, Booking, BookingId, CaptureMethod, ListingId, PaymentMethodRef, UserId,
};
use escrow_eng::processor::RecordingProcessor;

/// Generates the three-step happy path per booking (repeating):
/// 1. Issue the authorization hold
/// 2. Capture it
/// 3. Process the host payout
///
/// Every command is valid against a freshly seeded ledger, so the bench
/// measures the mutation path rather than error handling.
pub struct CommandGenerator {
    num_bookings: u32,
    current: u32,
    step: u32,
}

impl CommandGenerator {
    pub fn new(num_bookings: u32) -> Self {
        Self {
            num_bookings,
            current: 0,
            step: 0,
        }
    }
}

impl Iterator for CommandGenerator {
    type Item = Command;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current >= self.num_bookings {
            return None;
        }

        let booking = BookingId::new(format!("b{}", self.current));
        let command = match self.step {
            0 => Command::IssueHold {
                booking,
                actor: Actor::shopper(format!("s{}", self.current)),
            },
            1 => Command::CaptureHold {
                booking,
                actor: Actor::host("host1"),
            },
            _ => Command::ProcessPayout {
                booking,
                actor: Actor::system(),
            },
        };

        self.step += 1;
        if self.step >= 3 {
            self.step = 0;
            self.current += 1;
        }

        Some(command)
    }
}

fn seeded_engine(num_bookings: u32) -> Engine<RecordingProcessor, Directory> {
    let mut directory = Directory::new();
    directory.insert_ready("host1", "acct_host1");

    let mut engine = Engine::new(RecordingProcessor::new(), directory);
    for i in 0..num_bookings {
        engine.insert_booking(Booking::new(
            BookingId::new(format!("b{i}")),
            ListingId::new("l1"),
            UserId::new("host1"),
            UserId::new(format!("s{i}")),
            Amount::from_cents(10_000),
            Amount::from_cents(2_000),
            None,
            PaymentMethodRef::new(format!("pm_{i}")),
            CaptureMethod::Manual,
        ));
    }
    engine
}

fn bench_happy_path(c: &mut Criterion) {
    let mut group = c.benchmark_group("happy_path");

    for count in [1_000u32, 10_000, 100_000] {
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            b.iter(|| {
                let mut engine = seeded_engine(count);
                for command in CommandGenerator::new(count) {
                    let _ = black_box(engine.apply(command));
                }
                engine
            });
        });
    }

    group.finish();
}

fn bench_instant_book(c: &mut Criterion) {
    let mut group = c.benchmark_group("instant_book");

    // Automatic capture collapses issue+capture into one command.
    group.bench_function("10k_auto_capture", |b| {
        b.iter(|| {
            let mut directory = Directory::new();
            directory.insert_ready("host1", "acct_host1");
            let mut engine = Engine::new(RecordingProcessor::new(), directory);
            for i in 0..10_000u32 {
                engine.insert_booking(Booking::new(
                    BookingId::new(format!("b{i}")),
                    ListingId::new("l1"),
                    UserId::new("host1"),
                    UserId::new(format!("s{i}")),
                    Amount::from_cents(10_000),
                    Amount::from_cents(2_000),
                    None,
                    PaymentMethodRef::new(format!("pm_{i}")),
                    CaptureMethod::Automatic,
                ));
            }
            for i in 0..10_000u32 {
                let _ = black_box(engine.apply(Command::IssueHold {
                    booking: BookingId::new(format!("b{i}")),
                    actor: Actor::shopper(format!("s{i}")),
                }));
            }
            engine
        });
    });

    group.finish();
}

criterion_group!(benches, bench_happy_path, bench_instant_book);
criterion_main!(benches);
