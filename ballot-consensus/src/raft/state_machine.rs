use ballot_common::error::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Receives committed commands in log order. Commands and results are raw
/// bytes; the consensus core never looks inside them.
pub trait CommandApplier: Send {
    fn apply(&mut self, command: &[u8]) -> Result<Vec<u8>>;
}

/// Typed application state machine. Commands arrive `bincode`-encoded in the
/// log and responses are handed back encoded the same way, so any
/// `StateMachine` is also a [`CommandApplier`].
pub trait StateMachine: Send {
    type Command: DeserializeOwned;
    type Response: Serialize;

    /// Applies a command and returns a response
    fn apply(&mut self, command: Self::Command) -> anyhow::Result<Self::Response>;
}

impl<S: StateMachine> CommandApplier for S {
    fn apply(&mut self, command: &[u8]) -> Result<Vec<u8>> {
        let command: S::Command = bincode::deserialize(command)?;
        let response = StateMachine::apply(self, command)?;
        Ok(bincode::serialize(&response)?)
    }
}

/// Applier for servers that only need agreement on the log itself.
#[derive(Debug, Default)]
pub struct NoopApplier;

impl CommandApplier for NoopApplier {
    fn apply(&mut self, _command: &[u8]) -> Result<Vec<u8>> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ballot_common::error::BallotError;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize)]
    enum CounterCommand {
        Add(i64),
        Fail,
    }

    #[derive(Default)]
    struct Counter {
        total: i64,
    }

    impl StateMachine for Counter {
        type Command = CounterCommand;
        type Response = i64;

        fn apply(&mut self, command: CounterCommand) -> anyhow::Result<i64> {
            match command {
                CounterCommand::Add(n) => {
                    self.total += n;
                    Ok(self.total)
                }
                CounterCommand::Fail => anyhow::bail!("refused"),
            }
        }
    }

    #[test]
    fn test_typed_state_machine_through_bytes() {
        let mut counter = Counter::default();
        let applier: &mut dyn CommandApplier = &mut counter;

        let out = applier
            .apply(&bincode::serialize(&CounterCommand::Add(5)).unwrap())
            .unwrap();
        assert_eq!(bincode::deserialize::<i64>(&out).unwrap(), 5);

        let out = applier
            .apply(&bincode::serialize(&CounterCommand::Add(-2)).unwrap())
            .unwrap();
        assert_eq!(bincode::deserialize::<i64>(&out).unwrap(), 3);
    }

    #[test]
    fn test_apply_errors_are_reported() {
        let mut counter = Counter::default();
        let applier: &mut dyn CommandApplier = &mut counter;

        let err = applier
            .apply(&bincode::serialize(&CounterCommand::Fail).unwrap())
            .unwrap_err();
        assert!(matches!(err, BallotError::Apply(_)));

        let err = applier.apply(&[0xff, 0xff, 0xff, 0xff, 0xff]).unwrap_err();
        assert!(matches!(err, BallotError::Encoding(_)));
    }
}
